use anyhow::anyhow;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::config::{Config, LogFormat};

const DEFAULT_LOG_LEVEL: &str = "info";
const LOG_ENV_VAR: &str = "HARREPLAY_LOG";

/// Installs the global subscriber.
///
/// Precedence: `--log-level`, then a `HARREPLAY_LOG` filter directive, then
/// `[logging].level`, then `info`.
pub fn init(config: &Config, cli_level_override: Option<&str>) -> anyhow::Result<()> {
    let env_directive = std::env::var(LOG_ENV_VAR).ok();
    let filter = resolve_filter(config, cli_level_override, env_directive.as_deref())?;

    match resolve_log_format(config) {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .pretty()
            .try_init(),
    }
    .map_err(|err| anyhow!("initialize logging subscriber: {err}"))?;

    Ok(())
}

fn resolve_filter(
    config: &Config,
    cli_level_override: Option<&str>,
    env_directive: Option<&str>,
) -> anyhow::Result<EnvFilter> {
    if cli_level_override.is_none()
        && let Some(directive) = env_directive.filter(|value| !value.trim().is_empty())
    {
        return EnvFilter::try_new(directive)
            .map_err(|err| anyhow!("invalid {LOG_ENV_VAR} directive `{directive}`: {err}"));
    }

    let level = resolve_log_level(config, cli_level_override)?;
    Ok(EnvFilter::default().add_directive(level.into()))
}

fn resolve_log_level(
    config: &Config,
    cli_level_override: Option<&str>,
) -> anyhow::Result<LevelFilter> {
    let raw_level = cli_level_override
        .or_else(|| {
            config
                .logging
                .as_ref()
                .and_then(|logging| logging.level.as_deref())
        })
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let normalized = raw_level.trim().to_ascii_lowercase();

    normalized.parse::<LevelFilter>().map_err(|_| {
        anyhow!(
            "invalid log level `{raw_level}`; expected one of trace, debug, info, warn, error, off"
        )
    })
}

fn resolve_log_format(config: &Config) -> LogFormat {
    config
        .logging
        .as_ref()
        .and_then(|logging| logging.format)
        .unwrap_or(LogFormat::Json)
}
