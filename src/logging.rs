use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "nez=info";

type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Installs the global subscriber. Logs go to stderr; stdout carries the reply stream.
pub fn init() {
    if let Err(error) = install() {
        eprintln!("Warning: Failed to initialise logging: {}", error);
    }
}

fn install() -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
}
