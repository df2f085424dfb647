//! Fan-out of lifecycle events to an ordered set of extensions.

use std::sync::Arc;

use async_trait::async_trait;
use tower::BoxError;

use crate::context::RequestContext;
use crate::extension::EndHandler;
use crate::extension::ExecutionStarted;
use crate::extension::FieldInfo;
use crate::extension::GraphQLExtension;
use crate::extension::RequestStarted;
use crate::extension::ResolveEndHandler;
use crate::graphql::Error;
use crate::graphql::Response;

/// Produces one extension instance per request.
pub type ExtensionFactory = Arc<dyn Fn() -> Arc<dyn GraphQLExtension> + Send + Sync>;

/// One registered observer: a ready instance, or a factory invoked once
/// per request. Instances are shared across every request the registry
/// serves, so register an instance only when it is stateless; stateful
/// extensions go through a factory so no request sees another's state.
pub enum ExtensionEntry {
    Instance(Arc<dyn GraphQLExtension>),
    Factory(ExtensionFactory),
}

/// The ordered set of observers to notify about each request.
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: Vec<ExtensionEntry>,
}

impl ExtensionRegistry {
    pub fn new(entries: Vec<ExtensionEntry>) -> Self {
        Self { entries }
    }

    /// Build the per-request stack, invoking factories.
    pub fn instantiate(&self) -> ExtensionStack {
        let extensions = self
            .entries
            .iter()
            .map(|entry| match entry {
                ExtensionEntry::Instance(extension) => Arc::clone(extension),
                ExtensionEntry::Factory(factory) => factory(),
            })
            .collect();
        ExtensionStack { extensions }
    }
}

/// A composite [`GraphQLExtension`] notifying every registered
/// extension about each lifecycle event.
///
/// Start hooks run in registration order. End handlers run in reverse
/// registration order, the discipline of releasing scoped resources:
/// the last extension to observe a phase start is the first to observe
/// its end. Every collected end handler runs even when one of them
/// fails; the first failure propagates afterwards.
pub struct ExtensionStack {
    extensions: Vec<Arc<dyn GraphQLExtension>>,
}

impl ExtensionStack {
    pub fn new(extensions: Vec<Arc<dyn GraphQLExtension>>) -> Self {
        Self { extensions }
    }

    fn compose(end_handlers: Vec<EndHandler>) -> EndHandler {
        Box::new(move |errors: Vec<Error>| {
            Box::pin(async move {
                let mut first_failure = None;
                for end_handler in end_handlers.into_iter().rev() {
                    if let Err(err) = end_handler(errors.clone()).await {
                        tracing::warn!("extension end handler failed: {err}");
                        first_failure.get_or_insert(err);
                    }
                }
                match first_failure {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            })
        })
    }
}

#[async_trait]
impl GraphQLExtension for ExtensionStack {
    async fn request_started(
        &self,
        request: RequestStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        let mut end_handlers = Vec::new();
        for extension in &self.extensions {
            if let Some(end_handler) = extension.request_started(request).await? {
                end_handlers.push(end_handler);
            }
        }
        Ok(Some(Self::compose(end_handlers)))
    }

    async fn parsing_started(&self, query_string: &str) -> Result<Option<EndHandler>, BoxError> {
        let mut end_handlers = Vec::new();
        for extension in &self.extensions {
            if let Some(end_handler) = extension.parsing_started(query_string).await? {
                end_handlers.push(end_handler);
            }
        }
        Ok(Some(Self::compose(end_handlers)))
    }

    async fn validation_started(&self) -> Result<Option<EndHandler>, BoxError> {
        let mut end_handlers = Vec::new();
        for extension in &self.extensions {
            if let Some(end_handler) = extension.validation_started().await? {
                end_handlers.push(end_handler);
            }
        }
        Ok(Some(Self::compose(end_handlers)))
    }

    async fn execution_started(
        &self,
        execution: ExecutionStarted<'_>,
    ) -> Result<Option<EndHandler>, BoxError> {
        let mut end_handlers = Vec::new();
        for extension in &self.extensions {
            if let Some(end_handler) = extension.execution_started(execution).await? {
                end_handlers.push(end_handler);
            }
        }
        Ok(Some(Self::compose(end_handlers)))
    }

    /// Per-field fan-out is synchronous: each extension's start hook is
    /// awaited and its end handler invoked right away before moving to
    /// the next extension, keeping per-field timing windows
    /// non-overlapping across extensions.
    async fn will_resolve_field(
        &self,
        info: &FieldInfo,
    ) -> Result<Option<ResolveEndHandler>, BoxError> {
        for extension in &self.extensions {
            if let Some(end_handler) = extension.will_resolve_field(info).await? {
                end_handler(Vec::new(), None).await?;
            }
        }
        Ok(Some(Box::new(|_errors, _result| {
            Box::pin(async { Ok(()) })
        })))
    }

    /// The response threads through extensions in reverse registration
    /// order, so a later extension's replacement is seen by earlier
    /// ones.
    async fn will_send_response(
        &self,
        mut response: Response,
        context: &RequestContext,
    ) -> Result<Response, BoxError> {
        for extension in self.extensions.iter().rev() {
            response = extension.will_send_response(response, context).await?;
        }
        Ok(response)
    }
}
