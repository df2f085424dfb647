//! Request-scoped state shared between extensions.

use std::sync::Arc;

use apollo_compiler::ast::Document;
use parking_lot::Mutex;

/// State scoped to one request, shared by every extension observing it.
///
/// Cloning is shallow: clones address the same underlying scope. One
/// context serves exactly one request; it is never shared across
/// requests.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    inner: Arc<Mutex<Scope>>,
}

#[derive(Debug, Default)]
struct Scope {
    document: Option<Arc<Document>>,
    signature: Option<Arc<str>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The parsed query document, once some extension has stashed it
    /// (typically at execution start).
    pub fn document(&self) -> Option<Arc<Document>> {
        self.inner.lock().document.clone()
    }

    pub fn set_document(&self, document: Arc<Document>) {
        self.inner.lock().document = Some(document);
    }

    /// The signature computed for this request, if any observer already
    /// resolved it.
    pub fn signature(&self) -> Option<Arc<str>> {
        self.inner.lock().signature.clone()
    }

    pub fn set_signature(&self, signature: Arc<str>) {
        self.inner.lock().signature = Some(signature);
    }
}
