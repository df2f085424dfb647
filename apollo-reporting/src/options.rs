//! Reporting configuration.

use std::sync::Arc;
use std::time::Duration;

use apollo_compiler::ast::Document;
use tower::BoxError;
use url::Url;

use crate::reporting_extension::ClientInfo;

/// Computes the signature grouping a query for reporting. Overridable
/// per [`ReportingOptions::calculate_signature`]; the default is
/// [`apollo_signature::default_signature`].
pub type SignatureFunction = Arc<dyn Fn(&Document, &str) -> String + Send + Sync>;

/// Extracts client identity from the request head. The default reads
/// the three `apollographql-client-*` headers.
pub type ClientInfoFunction = Arc<dyn Fn(&http::request::Parts) -> ClientInfo + Send + Sync>;

/// Invoked with submission failures instead of logging them.
pub type ErrorCallback = Arc<dyn Fn(&BoxError) + Send + Sync>;

const DEFAULT_ENDPOINT: &str = "https://engine-report.apollodata.com/api/ingress/traces";

/// How often buffered traces are flushed to the sink. Deliberately not
/// 5 seconds, the default of common span batch processors, so the two
/// flushes stay distinguishable in logs.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(6);

/// Options for the reporting extension and agent.
#[derive(Clone)]
pub struct ReportingOptions {
    /// Authenticates reports to the ingress. Falls back to the
    /// `ENGINE_API_KEY` environment variable at agent construction.
    pub(crate) api_key: Option<String>,
    pub(crate) endpoint_url: Url,
    pub(crate) schema_tag: Option<String>,
    /// Replace error details with a placeholder message in traces.
    pub(crate) mask_error_details: bool,
    /// Log each report as JSON before submitting it.
    pub(crate) debug_print_reports: bool,
    pub(crate) flush_interval: Duration,
    pub(crate) calculate_signature: Option<SignatureFunction>,
    pub(crate) generate_client_info: Option<ClientInfoFunction>,
    pub(crate) report_errors: Option<ErrorCallback>,
}

#[buildstructor::buildstructor]
impl ReportingOptions {
    #[builder]
    pub fn new(
        api_key: Option<String>,
        endpoint_url: Option<Url>,
        schema_tag: Option<String>,
        mask_error_details: Option<bool>,
        debug_print_reports: Option<bool>,
        flush_interval: Option<Duration>,
        calculate_signature: Option<SignatureFunction>,
        generate_client_info: Option<ClientInfoFunction>,
        report_errors: Option<ErrorCallback>,
    ) -> Self {
        Self {
            api_key,
            endpoint_url: endpoint_url.unwrap_or_else(|| {
                Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid url")
            }),
            schema_tag,
            mask_error_details: mask_error_details.unwrap_or_default(),
            debug_print_reports: debug_print_reports.unwrap_or_default(),
            flush_interval: flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL),
            calculate_signature,
            generate_client_info,
            report_errors,
        }
    }

    pub fn endpoint_url(&self) -> &Url {
        &self.endpoint_url
    }
}

impl Default for ReportingOptions {
    fn default() -> Self {
        ReportingOptions::builder().build()
    }
}

impl std::fmt::Debug for ReportingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingOptions")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint_url", &self.endpoint_url)
            .field("schema_tag", &self.schema_tag)
            .field("mask_error_details", &self.mask_error_details)
            .field("debug_print_reports", &self.debug_print_reports)
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}
