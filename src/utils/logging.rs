use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,ort=warn,hyper=warn,reqwest=warn";

/// Plain-text logs to stdout, filtered by `RUST_LOG`. Safe to call more than
/// once; later calls are ignored.
pub fn init() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_ansi(false);
    let _ = fmt.try_init();
}
