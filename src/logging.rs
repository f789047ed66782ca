use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "grafana_report=info,tower_http=info";

/// Install the global subscriber. Logs go to stderr: stdout carries the
/// generated file name back to the dispatcher.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
