//! The tracing extension: builds one [`Trace`] per request and hands it
//! to the configured emission callback when the request ends.

use std::sync::Arc;
use std::time::Instant;
use std::time::SystemTime;

use apollo_compiler::ast::Document;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tower::BoxError;

use crate::context::RequestContext;
use crate::extension::EndHandler;
use crate::extension::ExecutionStarted;
use crate::extension::FieldInfo;
use crate::extension::GraphQLExtension;
use crate::extension::RequestStarted;
use crate::extension::ResolveEndHandler;
use crate::extension_stack::ExtensionFactory;
use crate::graphql::Response;
use crate::options::ReportingOptions;
use crate::signature_cache::resolve_signature;
use crate::trace::Trace;
use crate::trace::TraceError;
use crate::trace::TraceTreeBuilder;

pub const CLIENT_NAME_HEADER: &str = "apollographql-client-name";
pub const CLIENT_VERSION_HEADER: &str = "apollographql-client-version";
pub const CLIENT_REFERENCE_ID_HEADER: &str = "apollographql-client-reference-id";

const MASKED_ERROR_MESSAGE: &str = "<masked>";

/// Client identity read from the request head.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
    pub reference_id: String,
}

/// The default client identity extraction: the three
/// `apollographql-client-*` headers, each defaulting to the empty
/// string when absent. Header lookup is case-insensitive.
pub fn client_info_from_headers(request: &http::request::Parts) -> ClientInfo {
    let header = |name: &str| {
        request
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    ClientInfo {
        name: header(CLIENT_NAME_HEADER),
        version: header(CLIENT_VERSION_HEADER),
        reference_id: header(CLIENT_REFERENCE_ID_HEADER),
    }
}

/// Receives `(operation_name, document, query_string, trace)` exactly
/// once per completed request carrying tracing.
pub type TraceEmitter = Arc<
    dyn Fn(
            String,
            Option<Arc<Document>>,
            String,
            Trace,
        ) -> BoxFuture<'static, Result<(), BoxError>>
        + Send
        + Sync,
>;

/// Builds the trace for one request. One instance serves exactly one
/// request; register it through [`ReportingExtension::factory`].
pub struct ReportingExtension {
    inner: Arc<Inner>,
}

struct Inner {
    options: ReportingOptions,
    emit: TraceEmitter,
    state: Mutex<TraceState>,
}

struct TraceState {
    started_at: Instant,
    start_time: SystemTime,
    http_method: String,
    client: ClientInfo,
    operation_name: Option<String>,
    query_string: Option<String>,
    document: Option<Arc<Document>>,
    tree: TraceTreeBuilder,
    emitted: bool,
}

impl ReportingExtension {
    pub fn new(options: ReportingOptions, emit: TraceEmitter) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                emit,
                state: Mutex::new(TraceState {
                    started_at: Instant::now(),
                    start_time: SystemTime::now(),
                    http_method: String::new(),
                    client: ClientInfo::default(),
                    operation_name: None,
                    query_string: None,
                    document: None,
                    tree: TraceTreeBuilder::new(),
                    emitted: false,
                }),
            }),
        }
    }

    /// A registry entry producing a fresh instance per request.
    pub fn factory(options: ReportingOptions, emit: TraceEmitter) -> ExtensionFactory {
        Arc::new(move || Arc::new(ReportingExtension::new(options.clone(), Arc::clone(&emit))))
    }
}

impl Inner {
    fn elapsed_ns(started_at: Instant) -> u64 {
        started_at.elapsed().as_nanos() as u64
    }

    /// Finalize and emit, exactly once per request: a second invocation
    /// of the request end handler finds `emitted` set and does nothing.
    async fn finish_request(&self, context: RequestContext) -> Result<(), BoxError> {
        let (trace, operation_name, document, query_string) = {
            let mut state = self.state.lock();
            if state.emitted {
                return Ok(());
            }
            state.emitted = true;

            let duration_ns = Self::elapsed_ns(state.started_at);
            state.tree.node_mut(0).end_time = duration_ns;
            let tree = std::mem::replace(&mut state.tree, TraceTreeBuilder::new());

            let trace = Trace {
                start_time: state.start_time,
                end_time: SystemTime::now(),
                duration_ns,
                http_method: state.http_method.clone(),
                client_name: state.client.name.clone(),
                client_version: state.client.version.clone(),
                client_reference_id: state.client.reference_id.clone(),
                root: tree.into_root(),
            };
            (
                trace,
                state.operation_name.clone().unwrap_or_default(),
                state.document.clone(),
                state.query_string.clone().unwrap_or_default(),
            )
        };

        // Resolve the signature once and memoize it on the request, so
        // co-registered observers and the emitting agent agree on it.
        resolve_signature(
            Some(&context),
            None,
            self.options.calculate_signature.as_ref(),
            &operation_name,
            document.as_deref(),
            Some(&query_string),
        );

        (self.emit)(operation_name, document, query_string, trace).await
    }
}

#[async_trait]
impl GraphQLExtension for ReportingExtension {
    async fn request_started(
        &self,
        request: RequestStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        {
            let mut state = self.inner.state.lock();
            state.started_at = Instant::now();
            state.start_time = SystemTime::now();
            state.http_method = request.request.method.as_str().to_string();
            state.client = match &self.inner.options.generate_client_info {
                Some(generate) => generate(request.request),
                None => client_info_from_headers(request.request),
            };
            state.query_string = request.query_string.map(ToString::to_string);
            state.document = request.parsed_query.map(Arc::clone);
            if let Some(operation_name) = request.operation_name {
                state.operation_name = Some(operation_name.to_string());
            }
        }

        let inner = Arc::clone(&self.inner);
        let context = request.context.clone();
        Ok(Some(Box::new(move |_errors| {
            Box::pin(async move { inner.finish_request(context).await })
        })))
    }

    async fn execution_started(
        &self,
        execution: ExecutionStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        let mut state = self.inner.state.lock();
        if let Some(operation_name) = execution.operation_name {
            state.operation_name = Some(operation_name.to_string());
        }
        state.document = Some(Arc::clone(execution.document));
        // Stash the document for whoever needs the signature later,
        // even if this extension is dropped from the registry.
        execution.context.set_document(Arc::clone(execution.document));
        Ok(None)
    }

    async fn will_resolve_field(
        &self,
        info: &FieldInfo,
    ) -> Result<Option<ResolveEndHandler>, BoxError> {
        let node_id = {
            let mut state = self.inner.state.lock();
            if state.operation_name.is_none() {
                state.operation_name = Some(info.operation_name.clone().unwrap_or_default());
            }

            let start_time = Inner::elapsed_ns(state.started_at);
            let node_id = state.tree.node_at(&info.path);
            let node = state.tree.node_mut(node_id);
            node.start_time = start_time;
            node.parent_type = info.parent_type.clone();
            node.field_type = info.return_type.clone();
            node_id
        };

        let inner = Arc::clone(&self.inner);
        Ok(Some(Box::new(move |_errors, _result| {
            Box::pin(async move {
                let mut state = inner.state.lock();
                let end_time = Inner::elapsed_ns(state.started_at);
                state.tree.node_mut(node_id).end_time = end_time;
                Ok(())
            })
        })))
    }

    async fn will_send_response(
        &self,
        response: Response,
        _context: &RequestContext,
    ) -> Result<Response, BoxError> {
        let mut state = self.inner.state.lock();
        for error in &response.errors {
            let record = if self.inner.options.mask_error_details {
                TraceError {
                    message: MASKED_ERROR_MESSAGE.to_string(),
                    json: None,
                }
            } else {
                TraceError {
                    message: error.message.clone(),
                    json: serde_json::to_string(error).ok(),
                }
            };
            state.tree.attach_error(error.path.as_ref(), record);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::graphql::Error;
    use crate::graphql::ResponsePath;
    use crate::trace::TraceNode;

    type Emitted = Arc<Mutex<Vec<(String, Option<Arc<Document>>, String, Trace)>>>;

    fn recording_emitter() -> (TraceEmitter, Emitted) {
        let emitted: Emitted = Default::default();
        let sink = Arc::clone(&emitted);
        let emitter: TraceEmitter = Arc::new(move |operation_name, document, query, trace| {
            sink.lock().push((operation_name, document, query, trace));
            Box::pin(async { Ok(()) })
        });
        (emitter, emitted)
    }

    fn request_parts(headers: &[(&str, &str)]) -> http::request::Parts {
        let mut builder = http::Request::builder().method(http::Method::GET).uri("/graphql");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).expect("request builds").into_parts().0
    }

    fn field(path: ResponsePath, parent_type: &str, return_type: &str) -> FieldInfo {
        FieldInfo {
            path,
            parent_type: parent_type.to_string(),
            return_type: return_type.to_string(),
            operation_name: None,
        }
    }

    async fn resolve(extension: &ReportingExtension, info: &FieldInfo) {
        let end = extension
            .will_resolve_field(info)
            .await
            .expect("field hook runs")
            .expect("extension returns an end handler");
        end(Vec::new(), None).await.expect("end handler runs");
    }

    const QUERY: &str = "{ author(id: 5) { name posts(limit: 2) { id } } aBoolean }";

    async fn start_request(
        extension: &ReportingExtension,
        context: &RequestContext,
        parts: &http::request::Parts,
    ) -> EndHandler {
        extension
            .request_started(RequestStarted {
                request: parts,
                query_string: Some(QUERY),
                parsed_query: None,
                operation_name: None,
                variables: None,
                context,
            })
            .await
            .expect("request hook runs")
            .expect("extension returns an end handler")
    }

    fn child_names(node: &TraceNode) -> Vec<&str> {
        node.children
            .iter()
            .map(|child| child.response_name.as_deref().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn the_trace_tree_mirrors_the_selection_structure() {
        let (emitter, emitted) = recording_emitter();
        let extension = ReportingExtension::new(ReportingOptions::default(), emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[]);
        let end_request = start_request(&extension, &context, &parts).await;

        let author = ResponsePath::empty().key("author");
        resolve(&extension, &field(author.clone(), "Query", "User")).await;
        resolve(&extension, &field(author.clone().key("name"), "User", "String")).await;
        resolve(&extension, &field(author.clone().key("posts"), "User", "[Post]")).await;
        resolve(
            &extension,
            &field(author.clone().key("posts").index(0).key("id"), "Post", "Int"),
        )
        .await;
        resolve(
            &extension,
            &field(author.clone().key("posts").index(1).key("id"), "Post", "Int"),
        )
        .await;
        resolve(&extension, &field(ResponsePath::empty().key("aBoolean"), "Query", "Boolean")).await;

        end_request(Vec::new()).await.expect("request finalizes");

        let emitted = emitted.lock();
        assert_eq!(emitted.len(), 1);
        let trace = &emitted[0].3;

        assert_eq!(child_names(&trace.root), ["author", "aBoolean"]);

        let author_node = &trace.root.children[0];
        assert_eq!(author_node.parent_type, "Query");
        assert_eq!(author_node.field_type, "User");
        assert_eq!(child_names(author_node), ["name", "posts"]);

        let posts = &author_node.children[1];
        assert_eq!(posts.field_type, "[Post]");
        assert_eq!(posts.children.len(), 2);
        for (position, index_node) in posts.children.iter().enumerate() {
            assert_eq!(index_node.index, Some(position));
            assert_eq!(index_node.response_name, None);
            assert_eq!(child_names(index_node), ["id"]);
            assert_eq!(index_node.children[0].parent_type, "Post");
        }
    }

    #[tokio::test]
    async fn doubly_nested_lists_resolve_out_of_order() {
        let (emitter, emitted) = recording_emitter();
        let extension = ReportingExtension::new(ReportingOptions::default(), emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[]);
        let end_request = start_request(&extension, &context, &parts).await;

        let matrix = ResponsePath::empty().key("matrix");
        resolve(&extension, &field(matrix.clone(), "Query", "[[Cell]]")).await;
        // The second row's cell arrives before anything in the first
        // row exists.
        resolve(
            &extension,
            &field(matrix.clone().index(1).index(0).key("value"), "Cell", "Int"),
        )
        .await;
        resolve(
            &extension,
            &field(matrix.clone().index(0).index(1).key("value"), "Cell", "Int"),
        )
        .await;

        end_request(Vec::new()).await.expect("request finalizes");

        let emitted = emitted.lock();
        let matrix_node = &emitted[0].3.root.children[0];
        // Rows appear in arrival order with auto-created ancestors.
        let row_indexes: Vec<_> = matrix_node.children.iter().map(|row| row.index).collect();
        assert_eq!(row_indexes, [Some(1), Some(0)]);
        assert_eq!(matrix_node.children[0].children[0].index, Some(0));
        assert_eq!(matrix_node.children[1].children[0].index, Some(1));
        assert_eq!(
            matrix_node.children[0].children[0].children[0]
                .response_name
                .as_deref(),
            Some("value"),
        );
    }

    #[tokio::test]
    async fn errors_attach_to_the_most_specific_node() {
        let (emitter, emitted) = recording_emitter();
        let extension = ReportingExtension::new(ReportingOptions::default(), emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[]);
        let end_request = start_request(&extension, &context, &parts).await;

        let name_path = ResponsePath::empty().key("author").key("name");
        resolve(&extension, &field(ResponsePath::empty().key("author"), "Query", "User")).await;
        resolve(&extension, &field(name_path.clone(), "User", "String")).await;

        let response = Response {
            errors: vec![
                Error {
                    message: "name failed".to_string(),
                    path: Some(name_path),
                    ..Default::default()
                },
                Error {
                    message: "unmatched path".to_string(),
                    path: Some(ResponsePath::empty().key("ghost")),
                    ..Default::default()
                },
                Error::from_message("no path at all"),
            ],
            ..Default::default()
        };
        extension
            .will_send_response(response, &context)
            .await
            .expect("response hook runs");
        end_request(Vec::new()).await.expect("request finalizes");

        let emitted = emitted.lock();
        let root = &emitted[0].3.root;
        let root_messages: Vec<_> = root.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(root_messages, ["unmatched path", "no path at all"]);

        let name_node = &root.children[0].children[0];
        assert_eq!(name_node.errors.len(), 1);
        assert_eq!(name_node.errors[0].message, "name failed");
        assert!(name_node.errors[0].json.is_some());
    }

    #[tokio::test]
    async fn masking_replaces_error_details() {
        let (emitter, emitted) = recording_emitter();
        let options = ReportingOptions::builder().mask_error_details(true).build();
        let extension = ReportingExtension::new(options, emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[]);
        let end_request = start_request(&extension, &context, &parts).await;

        let response = Response {
            errors: vec![Error::from_message("contains secrets")],
            ..Default::default()
        };
        extension
            .will_send_response(response, &context)
            .await
            .expect("response hook runs");
        end_request(Vec::new()).await.expect("request finalizes");

        let emitted = emitted.lock();
        let error = &emitted[0].3.root.errors[0];
        assert_eq!(error.message, MASKED_ERROR_MESSAGE);
        assert_eq!(error.json, None);
    }

    #[tokio::test]
    async fn client_identity_comes_from_headers_case_insensitively() {
        let (emitter, emitted) = recording_emitter();
        let extension = ReportingExtension::new(ReportingOptions::default(), emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[
            ("ApolloGraphQL-Client-Name", "web"),
            ("apollographql-client-version", "1.2.3"),
        ]);
        let end_request = start_request(&extension, &context, &parts).await;
        end_request(Vec::new()).await.expect("request finalizes");

        let emitted = emitted.lock();
        let trace = &emitted[0].3;
        assert_eq!(trace.client_name, "web");
        assert_eq!(trace.client_version, "1.2.3");
        assert_eq!(trace.client_reference_id, "");
        assert_eq!(trace.http_method, "GET");
    }

    #[tokio::test]
    async fn emission_happens_exactly_once_even_with_zero_fields() {
        let (emitter, emitted) = recording_emitter();
        let extension = ReportingExtension::new(ReportingOptions::default(), emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[]);

        let first = start_request(&extension, &context, &parts).await;
        first(Vec::new()).await.expect("request finalizes");

        // A second end invocation is ignored.
        let second = {
            let inner = Arc::clone(&extension.inner);
            let context = context.clone();
            Box::pin(async move { inner.finish_request(context).await })
        };
        second.await.expect("repeat finalize is a no-op");

        let emitted = emitted.lock();
        assert_eq!(emitted.len(), 1);
        assert!(emitted[0].3.root.children.is_empty());
        // No document was ever stashed: the raw text is the signature.
        assert_eq!(context.signature().as_deref(), Some(QUERY));
    }

    #[tokio::test]
    async fn the_operation_name_falls_back_to_field_info() {
        let (emitter, emitted) = recording_emitter();
        let extension = ReportingExtension::new(ReportingOptions::default(), emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[]);
        let end_request = start_request(&extension, &context, &parts).await;

        let mut info = field(ResponsePath::empty().key("user"), "Query", "User");
        info.operation_name = Some("FromInfo".to_string());
        resolve(&extension, &info).await;
        end_request(Vec::new()).await.expect("request finalizes");

        let emitted = emitted.lock();
        assert_eq!(emitted[0].0, "FromInfo");
    }

    #[tokio::test]
    async fn a_custom_signature_strategy_wins() {
        let (emitter, emitted) = recording_emitter();
        let options = ReportingOptions::builder()
            .calculate_signature(Arc::new(|_document: &Document, _operation: &str| {
                "CUSTOM".to_string()
            }) as crate::options::SignatureFunction)
            .build();
        let extension = ReportingExtension::new(options, emitter);
        let context = RequestContext::new();
        let parts = request_parts(&[]);
        let end_request = start_request(&extension, &context, &parts).await;

        let document = Arc::new(Document::parse(QUERY, "query.graphql").expect("query parses"));
        extension
            .execution_started(ExecutionStarted {
                schema: None,
                document: &document,
                root: None,
                variables: None,
                operation_name: Some("Op"),
                context: &context,
            })
            .await
            .expect("execution hook runs");
        end_request(Vec::new()).await.expect("request finalizes");

        let emitted = emitted.lock();
        assert_eq!(emitted[0].0, "Op");
        assert!(emitted[0].1.is_some());
        assert_eq!(context.signature().as_deref(), Some("CUSTOM"));
        assert!(context.document().is_some());
    }
}
