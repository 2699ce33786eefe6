use crate::config::AppConfig;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber once.
///
/// Logs go to stderr so stdout stays clean for submission lines. The
/// `VOICEPIPE_LOG` variable overrides the default filter when set.
pub fn init_tracing(config: &AppConfig) {
    if config.no_logs {
        return;
    }
    let fallback = if config.logs {
        "voicepipe=debug"
    } else {
        "voicepipe=warn"
    };

    let _ = TRACING_INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_env("VOICEPIPE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
