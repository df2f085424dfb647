//! Memoized signature resolution.

use std::num::NonZeroUsize;
use std::sync::Arc;

use apollo_compiler::ast::Document;
use lru::LruCache;
use parking_lot::Mutex;

use crate::context::RequestContext;
use crate::options::SignatureFunction;

const DEFAULT_CAPACITY: usize = 10_000;

/// An explicitly sized cache of computed signatures, keyed by
/// (operation name, query text). Owned by whoever constructs it —
/// typically the reporting agent — never process-global.
pub struct SignatureCache {
    inner: Mutex<LruCache<(String, String), Arc<str>>>,
}

impl SignatureCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).expect("capacity is non-zero"))
    }

    fn get(&self, operation_name: &str, query_string: &str) -> Option<Arc<str>> {
        self.inner
            .lock()
            .get(&(operation_name.to_string(), query_string.to_string()))
            .cloned()
    }

    fn insert(&self, operation_name: &str, query_string: &str, signature: Arc<str>) {
        self.inner.lock().put(
            (operation_name.to_string(), query_string.to_string()),
            signature,
        );
    }
}

/// Resolve the signature for one request: the request memo first, then
/// the cache, then a fresh computation. With a parsed document the
/// configured (or default) signature function runs; without one the raw
/// query text stands in, so two requests carrying the same unparseable
/// text still group together. Whitespace-only differences in unparsed
/// text do not group — a documented limitation of the fallback.
pub fn resolve_signature(
    context: Option<&RequestContext>,
    cache: Option<&SignatureCache>,
    calculate: Option<&SignatureFunction>,
    operation_name: &str,
    document: Option<&Document>,
    query_string: Option<&str>,
) -> Option<Arc<str>> {
    if let Some(signature) = context.and_then(RequestContext::signature) {
        return Some(signature);
    }
    if let (Some(cache), Some(query_string)) = (cache, query_string) {
        if let Some(signature) = cache.get(operation_name, query_string) {
            if let Some(context) = context {
                context.set_signature(Arc::clone(&signature));
            }
            return Some(signature);
        }
    }

    let computed: Arc<str> = match (document, query_string) {
        (Some(document), _) => match calculate {
            Some(calculate) => Arc::from(calculate(document, operation_name)),
            None => Arc::from(apollo_signature::default_signature(
                document,
                operation_name,
            )),
        },
        (None, Some(query_string)) => Arc::from(query_string),
        (None, None) => return None,
    };

    if let Some(context) = context {
        context.set_signature(Arc::clone(&computed));
    }
    if let (Some(cache), Some(query_string)) = (cache, query_string) {
        cache.insert(operation_name, query_string, Arc::clone(&computed));
    }
    Some(computed)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    fn parse(query: &str) -> Document {
        Document::parse(query, "query.graphql").expect("query parses")
    }

    #[test]
    fn computes_the_default_signature_for_a_document() {
        let document = parse("{ user { name } }");
        let signature = resolve_signature(None, None, None, "", Some(&document), Some("raw"))
            .expect("signature resolves");
        assert_eq!(&*signature, "{user{name}}");
    }

    #[test]
    fn falls_back_to_the_raw_query_text_without_a_document() {
        let signature = resolve_signature(None, None, None, "", None, Some("not { valid"))
            .expect("fallback resolves");
        assert_eq!(&*signature, "not { valid");
    }

    #[test]
    fn resolves_to_nothing_with_neither_document_nor_text() {
        assert!(resolve_signature(None, None, None, "", None, None).is_none());
    }

    #[test]
    fn the_request_memo_wins_over_everything() {
        let context = RequestContext::new();
        context.set_signature(Arc::from("memoized"));
        let document = parse("{ user { name } }");
        let signature = resolve_signature(
            Some(&context),
            None,
            None,
            "",
            Some(&document),
            Some("raw"),
        )
        .expect("memo resolves");
        assert_eq!(&*signature, "memoized");
    }

    #[test]
    fn the_cache_skips_recomputation_across_requests() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counting: SignatureFunction = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_document, _operation_name| {
                calls.fetch_add(1, Ordering::SeqCst);
                "computed".to_string()
            })
        };

        let cache = SignatureCache::with_default_capacity();
        let document = parse("{ user { name } }");
        for _ in 0..3 {
            let signature = resolve_signature(
                None,
                Some(&cache),
                Some(&counting),
                "Op",
                Some(&document),
                Some("query text"),
            )
            .expect("signature resolves");
            assert_eq!(&*signature, "computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn operations_with_the_same_text_use_distinct_cache_entries() {
        let cache = SignatureCache::with_default_capacity();
        let text = "query A { a } query B { b }";
        resolve_signature(None, Some(&cache), None, "A", Some(&parse(text)), Some(text));
        resolve_signature(None, Some(&cache), None, "B", Some(&parse(text)), Some(text));
        assert_eq!(cache.get("A", text).as_deref(), Some("query A{a}"));
        assert_eq!(cache.get("B", text).as_deref(), Some("query B{b}"));
    }
}
