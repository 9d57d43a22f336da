use tracing::Level;

/// Initialize tracing for the server.
///
/// Dev mode keeps ANSI colors and module targets for local debugging;
/// production output is plain single-line text for log shippers. Later
/// calls are ignored, so test setups may call this freely.
pub fn init(default_level: &str, dev: bool) {
    let level = match default_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(dev)
        .with_ansi(dev)
        .try_init();
}

/// Masks an API key for log output. Only a short prefix survives; keys
/// never appear in logs in full.
pub fn redact_key(key: &str) -> String {
    if key.len() > 8 {
        let prefix: String = key.chars().take(4).collect();
        format!("{}***", prefix)
    } else {
        "***".to_string()
    }
}
