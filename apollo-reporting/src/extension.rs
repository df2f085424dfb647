//! The query lifecycle observation protocol.
//!
//! An extension watches one request move through its phases: request,
//! parse, validate, execute, per-field resolution, response. Each
//! "start" hook may return an end handler, invoked when that phase ends
//! with whatever errors the phase raised. Extensions hold request-scoped
//! state; unless an implementation is deliberately stateless, one
//! instance must serve exactly one request (register a factory, not an
//! instance, to get that for free).

use std::future::Future;
use std::sync::Arc;

use apollo_compiler::Schema;
use apollo_compiler::ast::Document;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Map;
use serde_json::Value;
use tower::BoxError;

use crate::context::RequestContext;
use crate::graphql::Error;
use crate::graphql::Response;
use crate::graphql::ResponsePath;

/// Invoked when a lifecycle phase ends, with the errors the phase
/// raised (empty on success).
pub type EndHandler = Box<dyn FnOnce(Vec<Error>) -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// Invoked when one field resolution ends, with any resolution error
/// and the resolved value.
pub type ResolveEndHandler = Box<
    dyn FnOnce(Vec<Error>, Option<Value>) -> BoxFuture<'static, Result<(), BoxError>> + Send,
>;

/// Arguments to [`GraphQLExtension::request_started`].
#[derive(Clone, Copy)]
pub struct RequestStarted<'a> {
    /// Head of the HTTP request carrying the query.
    pub request: &'a http::request::Parts,
    /// The raw query text, when already known.
    pub query_string: Option<&'a str>,
    /// The parsed query, when the caller already has one (e.g. from a
    /// document cache).
    pub parsed_query: Option<&'a Arc<Document>>,
    /// The requested operation name.
    pub operation_name: Option<&'a str>,
    /// The request variables.
    pub variables: Option<&'a Map<String, Value>>,
    /// State shared between this request's extensions.
    pub context: &'a RequestContext,
}

/// Arguments to [`GraphQLExtension::execution_started`].
#[derive(Clone, Copy)]
pub struct ExecutionStarted<'a> {
    /// The schema execution runs against, when the executor exposes it.
    pub schema: Option<&'a Valid<Schema>>,
    /// The document being executed.
    pub document: &'a Arc<Document>,
    /// The root value execution starts from.
    pub root: Option<&'a Value>,
    /// The request variables.
    pub variables: Option<&'a Map<String, Value>>,
    /// The operation selected for execution.
    pub operation_name: Option<&'a str>,
    /// State shared between this request's extensions.
    pub context: &'a RequestContext,
}

/// Everything an extension learns about one field about to be resolved.
/// Field resolution hooks fire once per field, including once per
/// list-element position.
#[derive(Clone, Debug)]
pub struct FieldInfo {
    /// Where the resolved value lands in the response.
    pub path: ResponsePath,
    /// Name of the type the field is selected on.
    pub parent_type: String,
    /// The field's declared return type.
    pub return_type: String,
    /// Name of the operation being executed, `None` when anonymous.
    pub operation_name: Option<String>,
}

/// A pluggable observer of the query lifecycle.
///
/// All hooks default to observing nothing, so implementations spell out
/// only the phases they care about.
#[async_trait]
pub trait GraphQLExtension: Send + Sync {
    /// The request was received. The returned end handler runs after
    /// the response was sent, success or failure.
    async fn request_started(
        &self,
        request: RequestStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        let _ = request;
        Ok(None)
    }

    /// The query text is about to be parsed.
    async fn parsing_started(&self, query_string: &str) -> Result<Option<EndHandler>, BoxError> {
        let _ = query_string;
        Ok(None)
    }

    /// The parsed document is about to be validated.
    async fn validation_started(&self) -> Result<Option<EndHandler>, BoxError> {
        Ok(None)
    }

    /// Execution of the selected operation is about to begin.
    async fn execution_started(
        &self,
        execution: ExecutionStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        let _ = execution;
        Ok(None)
    }

    /// One field is about to be resolved.
    async fn will_resolve_field(
        &self,
        info: &FieldInfo,
    ) -> Result<Option<ResolveEndHandler>, BoxError> {
        let _ = info;
        Ok(None)
    }

    /// The response is about to be sent and may be replaced.
    async fn will_send_response(
        &self,
        response: Response,
        context: &RequestContext,
    ) -> Result<Response, BoxError> {
        let _ = context;
        Ok(response)
    }
}

/// Adapter for driving an extension the way resolver middleware would:
/// fire the start hook, await the resolver, then invoke the end handler
/// on both exit paths, handing it the resolution error or the resolved
/// value.
pub async fn wrap_field_resolution<F>(
    extension: &dyn GraphQLExtension,
    info: &FieldInfo,
    resolve: F,
) -> Result<Value, BoxError>
where
    F: Future<Output = Result<Value, BoxError>> + Send,
{
    let end_handler = extension.will_resolve_field(info).await?;
    let result = resolve.await;
    if let Some(end_handler) = end_handler {
        let (errors, value) = match &result {
            Ok(value) => (Vec::new(), Some(value.clone())),
            Err(err) => (vec![Error::from_message(err.to_string())], None),
        };
        if let Err(end_err) = end_handler(errors, value).await {
            tracing::warn!("field resolution end handler failed: {end_err}");
        }
    }
    result
}
