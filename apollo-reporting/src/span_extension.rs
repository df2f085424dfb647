//! Span emission: mirrors the query lifecycle as `tracing` spans for
//! whatever subscriber (console, OTLP bridge, test collector) the host
//! process installed.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::ast::Document;
use async_trait::async_trait;
use parking_lot::Mutex;
use tower::BoxError;
use tracing::Span;
use tracing::field;

use crate::context::RequestContext;
use crate::extension::EndHandler;
use crate::extension::ExecutionStarted;
use crate::extension::FieldInfo;
use crate::extension::GraphQLExtension;
use crate::extension::RequestStarted;
use crate::extension::ResolveEndHandler;
use crate::extension_stack::ExtensionFactory;
use crate::graphql::Response;
use crate::signature_cache::resolve_signature;

/// Emits one span per request and one per resolved field, named by
/// dotted response path. The request span gets the operation name and
/// signature recorded when the request ends.
///
/// Field spans are kept flat rather than nested into the response tree;
/// the reporting extension already records the tree shape, spans are
/// for wall-clock correlation.
#[derive(Default)]
pub struct SpanExtension {
    state: Arc<Mutex<SpanState>>,
}

#[derive(Default)]
struct SpanState {
    request_span: Option<Span>,
    field_spans: HashMap<String, Span>,
    operation_name: Option<String>,
    query_string: Option<String>,
    document: Option<Arc<Document>>,
}

impl SpanExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry entry producing a fresh instance per request.
    pub fn factory() -> ExtensionFactory {
        Arc::new(|| Arc::new(SpanExtension::new()))
    }
}

#[async_trait]
impl GraphQLExtension for SpanExtension {
    async fn request_started(
        &self,
        request: RequestStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        let span = tracing::info_span!(
            "graphql.request",
            graphql.operation.name = field::Empty,
            graphql.operation.signature = field::Empty,
        );
        {
            let mut state = self.state.lock();
            state.request_span = Some(span);
            state.query_string = request.query_string.map(ToString::to_string);
            state.document = request.parsed_query.map(Arc::clone);
        }

        let state = Arc::clone(&self.state);
        let context = request.context.clone();
        Ok(Some(Box::new(move |_errors| {
            Box::pin(async move {
                let (span, operation_name, document, query_string) = {
                    let mut state = state.lock();
                    (
                        state.request_span.take(),
                        state.operation_name.clone().unwrap_or_default(),
                        state.document.clone(),
                        state.query_string.clone(),
                    )
                };
                if let Some(span) = span {
                    span.record("graphql.operation.name", operation_name.as_str());
                    if let Some(signature) = resolve_signature(
                        Some(&context),
                        None,
                        None,
                        &operation_name,
                        document.as_deref(),
                        query_string.as_deref(),
                    ) {
                        span.record("graphql.operation.signature", &*signature);
                    }
                }
                Ok(())
            })
        })))
    }

    async fn execution_started(
        &self,
        execution: ExecutionStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        let mut state = self.state.lock();
        if let Some(operation_name) = execution.operation_name {
            state.operation_name = Some(operation_name.to_string());
        }
        state.document = Some(Arc::clone(execution.document));
        Ok(None)
    }

    async fn will_resolve_field(
        &self,
        info: &FieldInfo,
    ) -> Result<Option<ResolveEndHandler>, BoxError> {
        {
            let mut state = self.state.lock();
            if state.operation_name.is_none() {
                state.operation_name = Some(info.operation_name.clone().unwrap_or_default());
            }
        }

        let path = info.path.to_string();
        let span = tracing::info_span!(
            "graphql.resolve",
            graphql.path = %path,
            graphql.field.parent_type = %info.parent_type,
            graphql.field.return_type = %info.return_type,
        );
        self.state.lock().field_spans.insert(path.clone(), span);

        let state = Arc::clone(&self.state);
        Ok(Some(Box::new(move |_errors, _result| {
            Box::pin(async move {
                // Dropping the span closes it.
                state.lock().field_spans.remove(&path);
                Ok(())
            })
        })))
    }

    async fn will_send_response(
        &self,
        response: Response,
        _context: &RequestContext,
    ) -> Result<Response, BoxError> {
        let state = self.state.lock();
        if let Some(span) = &state.request_span {
            for error in &response.errors {
                let path = error
                    .path
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                span.in_scope(|| {
                    tracing::warn!(message = %error.message, path = %path, "graphql error");
                });
            }
        }
        Ok(response)
    }
}
