//! The reporting agent: buffers completed traces grouped by signature
//! and periodically hands them to a [`ReportSink`].
//!
//! The sink owns the wire format and the network; this module owns
//! batching, grouping and backpressure. Desired behavior, in order:
//! traces are batched with a timeout; when the sink cannot keep up,
//! traces are dropped with a warning rather than blocking request
//! handling; when the queue closes, the remaining batch is flushed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tower::BoxError;

use crate::error::ConfigurationError;
use crate::options::ReportingOptions;
use crate::options::SignatureFunction;
use crate::reporting_extension::TraceEmitter;
use crate::signature_cache::SignatureCache;
use crate::signature_cache::resolve_signature;
use crate::trace::Trace;

const DEFAULT_QUEUE_SIZE: usize = 65_536;

const API_KEY_ENV: &str = "ENGINE_API_KEY";
const SCHEMA_TAG_ENV: &str = "ENGINE_SCHEMA_TAG";

/// Identifies the server producing a report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub hostname: String,
    pub agent_version: String,
    pub runtime_version: String,
    pub schema_hash: String,
    pub schema_tag: String,
}

/// One batch of traces, grouped by stats report key
/// (`"# {operation}\n{signature}"`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Report {
    pub header: ReportHeader,
    pub traces_per_query: HashMap<String, Vec<Trace>>,
}

impl Report {
    fn new(header: ReportHeader) -> Self {
        Self {
            header,
            traces_per_query: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.traces_per_query.is_empty()
    }

    fn add(&mut self, stats_report_key: String, trace: Trace) {
        self.traces_per_query
            .entry(stats_report_key)
            .or_default()
            .push(trace);
    }
}

/// A report ready for submission.
#[derive(Clone, Debug)]
pub struct ReportRequest {
    pub api_key: String,
    pub report: Report,
}

/// The transport boundary. Implementations serialize and ship; the
/// stock deployment posts gzipped payloads to the ingress, tests record
/// in memory.
#[async_trait]
pub trait ReportSink: Send + Sync + 'static {
    async fn submit(&self, request: ReportRequest) -> Result<(), BoxError>;
}

struct TraceEntry {
    stats_report_key: String,
    trace: Trace,
}

/// Buffers traces and flushes them to the sink on an interval, plus a
/// final flush when every emitter (and the agent itself) is dropped.
pub struct ReportingAgent {
    tx: mpsc::Sender<TraceEntry>,
    task: tokio::task::JoinHandle<()>,
    cache: Arc<SignatureCache>,
    calculate_signature: Option<SignatureFunction>,
}

impl ReportingAgent {
    /// Fails fast when no API key is configured, via options or the
    /// `ENGINE_API_KEY` environment variable.
    pub fn new(
        options: ReportingOptions,
        schema_hash: impl Into<String>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, ConfigurationError> {
        let api_key = options
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .ok_or(ConfigurationError::MissingApiKey)?;

        let header = ReportHeader {
            hostname: sys_info::hostname().unwrap_or_default(),
            agent_version: format!("{}@{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            runtime_version: "rust".to_string(),
            schema_hash: schema_hash.into(),
            schema_tag: options
                .schema_tag
                .clone()
                .or_else(|| std::env::var(SCHEMA_TAG_ENV).ok())
                .unwrap_or_default(),
        };

        let (tx, mut rx) = mpsc::channel::<TraceEntry>(DEFAULT_QUEUE_SIZE);
        let calculate_signature = options.calculate_signature.clone();

        let endpoint = options.endpoint_url.clone();
        tracing::debug!(endpoint = %endpoint, "starting reporting agent");

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(options.flush_interval);
            let mut report = Report::new(header.clone());

            loop {
                tokio::select! {
                    entry = rx.next() => {
                        match entry {
                            Some(entry) => report.add(entry.stats_report_key, entry.trace),
                            None => {
                                tracing::debug!("trace queue closed, terminating reporting agent");
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        let batch = std::mem::replace(&mut report, Report::new(header.clone()));
                        send_report(&*sink, &api_key, batch, &options).await;
                    }
                }
            }

            send_report(&*sink, &api_key, report, &options).await;
        });

        Ok(Self {
            tx,
            task,
            cache: Arc::new(SignatureCache::with_default_capacity()),
            calculate_signature,
        })
    }

    /// The emission callback to hand to a
    /// [`ReportingExtension`](crate::reporting_extension::ReportingExtension):
    /// resolves the signature (through this agent's cache), builds the
    /// stats report key, and enqueues the trace.
    pub fn trace_emitter(&self) -> TraceEmitter {
        let tx = self.tx.clone();
        let cache = Arc::clone(&self.cache);
        let calculate_signature = self.calculate_signature.clone();

        Arc::new(move |operation_name, document, query_string, trace| {
            let mut tx = tx.clone();
            let cache = Arc::clone(&cache);
            let calculate_signature = calculate_signature.clone();
            Box::pin(async move {
                let signature = resolve_signature(
                    None,
                    Some(&cache),
                    calculate_signature.as_ref(),
                    &operation_name,
                    document.as_deref(),
                    Some(&query_string),
                )
                .unwrap_or_else(|| Arc::from(query_string.as_str()));

                let reported_name = if operation_name.is_empty() {
                    "-"
                } else {
                    operation_name.as_str()
                };
                let stats_report_key = format!("# {reported_name}\n{signature}");

                if let Err(err) = tx.try_send(TraceEntry {
                    stats_report_key,
                    trace,
                }) {
                    tracing::warn!("could not enqueue trace, trace will be dropped: {err}");
                }
                Ok(())
            })
        })
    }

    /// Close the queue and wait for the final flush. Emitters hold
    /// queue handles of their own; the final flush happens once the
    /// last of them is dropped too.
    pub async fn shutdown(self) {
        let Self { tx, task, .. } = self;
        drop(tx);
        if let Err(err) = task.await {
            tracing::warn!("reporting agent task failed during shutdown: {err}");
        }
    }
}

async fn send_report(
    sink: &dyn ReportSink,
    api_key: &str,
    report: Report,
    options: &ReportingOptions,
) {
    if report.is_empty() {
        return;
    }

    if options.debug_print_reports {
        match serde_json::to_string(&report) {
            Ok(json) => tracing::info!(report = %json, "sending report"),
            Err(err) => tracing::warn!("could not serialize report for debug output: {err}"),
        }
    }

    let request = ReportRequest {
        api_key: api_key.to_string(),
        report,
    };
    if let Err(err) = sink.submit(request).await {
        match &options.report_errors {
            Some(report_error) => report_error(&err),
            None => tracing::warn!("failed to submit report: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use parking_lot::Mutex;

    use super::*;
    use crate::trace::TraceNode;

    #[derive(Default)]
    struct RecordingSink {
        submissions: Mutex<Vec<ReportRequest>>,
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn submit(&self, request: ReportRequest) -> Result<(), BoxError> {
            self.submissions.lock().push(request);
            Ok(())
        }
    }

    fn sample_trace() -> Trace {
        Trace {
            start_time: SystemTime::now(),
            end_time: SystemTime::now(),
            duration_ns: 42,
            http_method: "POST".to_string(),
            client_name: String::new(),
            client_version: String::new(),
            client_reference_id: String::new(),
            root: TraceNode::default(),
        }
    }

    #[test]
    fn construction_fails_without_an_api_key() {
        // Run outside a runtime on purpose: the key check precedes the
        // task spawn.
        let result = ReportingAgent::new(
            ReportingOptions::default(),
            "schema-hash",
            Arc::new(RecordingSink::default()),
        );
        assert!(matches!(result, Err(ConfigurationError::MissingApiKey)));
    }

    #[tokio::test]
    async fn traces_group_by_stats_report_key() {
        let sink = Arc::new(RecordingSink::default());
        let options = ReportingOptions::builder().api_key("key".to_string()).build();
        let agent =
            ReportingAgent::new(options, "schema-hash", Arc::clone(&sink) as Arc<dyn ReportSink>)
                .expect("agent starts");
        let emit = agent.trace_emitter();

        emit(
            String::new(),
            None,
            "{ one }".to_string(),
            sample_trace(),
        )
        .await
        .expect("trace enqueues");
        emit(
            String::new(),
            None,
            "{ one }".to_string(),
            sample_trace(),
        )
        .await
        .expect("trace enqueues");
        emit(
            "Named".to_string(),
            None,
            "query Named { two }".to_string(),
            sample_trace(),
        )
        .await
        .expect("trace enqueues");

        drop(emit);
        agent.shutdown().await;

        let submissions = sink.submissions.lock();
        assert_eq!(submissions.len(), 1);
        let request = &submissions[0];
        assert_eq!(request.api_key, "key");

        let report = &request.report;
        assert_eq!(report.header.schema_hash, "schema-hash");
        assert!(!report.header.agent_version.is_empty());
        assert_eq!(report.traces_per_query.len(), 2);
        // Anonymous operations report under "-"; unparsed documents
        // fall back to the raw query text as their signature.
        assert_eq!(report.traces_per_query["# -\n{ one }"].len(), 2);
        assert_eq!(
            report.traces_per_query["# Named\nquery Named { two }"].len(),
            1,
        );
    }

    #[tokio::test]
    async fn parsed_documents_group_under_their_signature() {
        let sink = Arc::new(RecordingSink::default());
        let options = ReportingOptions::builder().api_key("key".to_string()).build();
        let agent =
            ReportingAgent::new(options, "schema-hash", Arc::clone(&sink) as Arc<dyn ReportSink>)
                .expect("agent starts");
        let emit = agent.trace_emitter();

        // Textually different, semantically identical.
        for query in ["{ user { name } }", "{  user  {  name  }  }"] {
            let document = Arc::new(
                apollo_compiler::ast::Document::parse(query, "query.graphql")
                    .expect("query parses"),
            );
            emit(String::new(), Some(document), query.to_string(), sample_trace())
                .await
                .expect("trace enqueues");
        }

        drop(emit);
        agent.shutdown().await;

        let submissions = sink.submissions.lock();
        let report = &submissions[0].report;
        assert_eq!(report.traces_per_query.len(), 1);
        assert_eq!(report.traces_per_query["# -\n{user{name}}"].len(), 2);
    }

    #[tokio::test]
    async fn submission_failures_reach_the_error_callback() {
        struct FailingSink;

        #[async_trait]
        impl ReportSink for FailingSink {
            async fn submit(&self, _request: ReportRequest) -> Result<(), BoxError> {
                Err(BoxError::from("ingress unreachable"))
            }
        }

        let reported = Arc::new(Mutex::new(Vec::new()));
        let options = ReportingOptions::builder()
            .api_key("key".to_string())
            .report_errors({
                let reported = Arc::clone(&reported);
                Arc::new(move |err: &BoxError| reported.lock().push(err.to_string()))
                    as crate::options::ErrorCallback
            })
            .build();
        let agent = ReportingAgent::new(options, "schema-hash", Arc::new(FailingSink))
            .expect("agent starts");
        let emit = agent.trace_emitter();

        emit(String::new(), None, "{ one }".to_string(), sample_trace())
            .await
            .expect("trace enqueues");
        drop(emit);
        agent.shutdown().await;

        assert_eq!(*reported.lock(), ["ingress unreachable"]);
    }
}
