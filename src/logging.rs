use anyhow::anyhow;
use tracing_subscriber::filter::LevelFilter;

use crate::configs::{AppConfig, LogFormat};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Install the global subscriber. Logs go to stderr so stdout stays usable
/// for command output.
pub fn init(config: &AppConfig, cli_level_override: Option<&str>) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(resolve_log_level(config, cli_level_override)?)
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    }
    .map_err(|err| anyhow!("initialize logging subscriber: {err}"))
}

/// CLI `--log-level` wins over `[logging] level`, which wins over `info`.
fn resolve_log_level(config: &AppConfig, cli_level: Option<&str>) -> anyhow::Result<LevelFilter> {
    let raw = cli_level
        .or(config.logging.level.as_deref())
        .unwrap_or(DEFAULT_LOG_LEVEL);

    raw.trim()
        .to_ascii_lowercase()
        .parse::<LevelFilter>()
        .map_err(|_| anyhow!("invalid log level `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::resolve_log_level;
    use crate::configs::AppConfig;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn log_level_resolution_order() {
        let config = AppConfig::from_toml_str("[logging]\nlevel = \"warn\"\n").unwrap();

        assert_eq!(resolve_log_level(&AppConfig::default(), None).unwrap(), LevelFilter::INFO);
        assert_eq!(resolve_log_level(&config, None).unwrap(), LevelFilter::WARN);
        assert_eq!(resolve_log_level(&config, Some(" DEBUG ")).unwrap(), LevelFilter::DEBUG);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let err = resolve_log_level(&AppConfig::default(), Some("verbose")).unwrap_err();
        assert!(err.to_string().contains("invalid log level `verbose`"), "{err}");
    }
}
