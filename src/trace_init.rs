//! JSON trace logs for decoding runs.
//!
//! Every sentence is decoded inside a `translate` span carrying the request,
//! the worker and the sentence id, so one file can hold several concurrent
//! requests and still be split apart afterwards.

use std::path::PathBuf;

/// Environment variable holding filter directives; wins over everything else.
pub const FILTER_ENV: &str = "SMT_DECODER_TRACE";

/// Used when neither the environment nor [`TraceOptions::filter`] says
/// otherwise. Per-hypothesis events in the search are `trace` level and
/// stay off.
pub const DEFAULT_FILTER: &str = "smt_decoder=debug,smt_core=debug";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
    pub log_dir: PathBuf,
    /// `tracing_subscriber::EnvFilter` directives.
    pub filter: Option<String>,
    /// Name files after the process id so runs sharing a directory do not
    /// interleave.
    pub per_process: bool,
}

impl TraceOptions {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            filter: None,
            per_process: false,
        }
    }

    pub fn file_name(&self) -> String {
        if self.per_process {
            format!("smt-decoder-trace.{}.jsonl", std::process::id())
        } else {
            "smt-decoder-trace.jsonl".to_string()
        }
    }

    /// Filter directives in effect, given the value of [`FILTER_ENV`].
    pub fn directives(&self, env: Option<&str>) -> String {
        env.filter(|s| !s.trim().is_empty())
            .or(self.filter.as_deref())
            .unwrap_or(DEFAULT_FILTER)
            .to_string()
    }
}

#[cfg(feature = "trace")]
static INIT: std::sync::Once = std::sync::Once::new();

/// Install the JSON subscriber. Only the first call has an effect.
#[cfg(feature = "trace")]
pub fn init_tracing(options: &TraceOptions) {
    INIT.call_once(|| {
        let env = std::env::var(FILTER_ENV).ok();
        let filter = tracing_subscriber::EnvFilter::try_new(options.directives(env.as_deref()))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        let file_appender = tracing_appender::rolling::never(&options.log_dir, options.file_name());
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // the writer must outlive every decoding thread
        std::mem::forget(guard);

        tracing_subscriber::fmt()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .with_env_filter(filter)
            .init();
    });
}

#[cfg(not(feature = "trace"))]
pub fn init_tracing(_options: &TraceOptions) {}
