use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over `SQL_CHAT_LOG_LEVEL`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(std::env::var("SQL_CHAT_LOG_LEVEL").unwrap_or_else(|_| "info".into()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer().with_target(true);

    if tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .try_init()
        .is_err()
    {
        eprintln!("[sql_chat][WARN] global tracing subscriber already installed");
    }
}
