//! Extension-based query tracing and usage reporting for GraphQL
//! servers.
//!
//! The host server drives a [`GraphQLExtension`] stack through the
//! request lifecycle (request → parse → validate → execute → per-field
//! resolution → response). The stock extensions are
//! [`ReportingExtension`], which records one timing [`Trace`] per
//! request and emits it with the operation's canonical signature, and
//! [`SpanExtension`], which mirrors the lifecycle as `tracing` spans.
//! The [`ReportingAgent`] buffers emitted traces grouped by signature
//! and flushes them to a pluggable [`ReportSink`].
//!
//! Tracing is best-effort instrumentation: nothing in this crate is
//! allowed to break request serving. Hook failures surface to the
//! caller as [`BoxError`]s, submission failures are logged or handed to
//! a configured callback, and a full trace queue drops traces rather
//! than blocking.

#![warn(unreachable_pub)]

pub mod agent;
mod context;
pub mod error;
mod extension;
mod extension_stack;
pub mod graphql;
mod options;
mod reporting_extension;
mod signature_cache;
mod span_extension;
mod trace;

pub use tower::BoxError;

pub use crate::agent::Report;
pub use crate::agent::ReportHeader;
pub use crate::agent::ReportRequest;
pub use crate::agent::ReportSink;
pub use crate::agent::ReportingAgent;
pub use crate::context::RequestContext;
pub use crate::error::ConfigurationError;
pub use crate::extension::EndHandler;
pub use crate::extension::ExecutionStarted;
pub use crate::extension::FieldInfo;
pub use crate::extension::GraphQLExtension;
pub use crate::extension::RequestStarted;
pub use crate::extension::ResolveEndHandler;
pub use crate::extension::wrap_field_resolution;
pub use crate::extension_stack::ExtensionEntry;
pub use crate::extension_stack::ExtensionFactory;
pub use crate::extension_stack::ExtensionRegistry;
pub use crate::extension_stack::ExtensionStack;
pub use crate::options::ClientInfoFunction;
pub use crate::options::ErrorCallback;
pub use crate::options::ReportingOptions;
pub use crate::options::SignatureFunction;
pub use crate::reporting_extension::CLIENT_NAME_HEADER;
pub use crate::reporting_extension::CLIENT_REFERENCE_ID_HEADER;
pub use crate::reporting_extension::CLIENT_VERSION_HEADER;
pub use crate::reporting_extension::ClientInfo;
pub use crate::reporting_extension::ReportingExtension;
pub use crate::reporting_extension::TraceEmitter;
pub use crate::reporting_extension::client_info_from_headers;
pub use crate::signature_cache::SignatureCache;
pub use crate::signature_cache::resolve_signature;
pub use crate::span_extension::SpanExtension;
pub use crate::trace::Trace;
pub use crate::trace::TraceError;
pub use crate::trace::TraceNode;
