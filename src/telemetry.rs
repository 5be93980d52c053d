use anyhow::Context;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Settings;

/// Filter for an explicit `LOG_LEVEL` directive such as `info` or
/// `fcar_reports=debug,sqlx=warn`.
fn level_filter(level: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("invalid LOG_LEVEL '{level}'"))
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `LOG_LEVEL`.
///
/// Logs go to stderr; stdout carries rendered reports. Each command is one
/// short run, so span close events are not recorded.
pub fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&settings.log_level)?,
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr);

    if settings.log_json {
        builder.json().try_init().map_err(|err| anyhow::anyhow!(err.to_string()))?;
    } else {
        builder.try_init().map_err(|err| anyhow::anyhow!(err.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_accepts_directives() {
        assert!(level_filter("info").is_ok());
        assert!(level_filter("fcar_reports=debug,sqlx=warn").is_ok());
    }

    #[test]
    fn level_filter_names_bad_level() {
        let err = level_filter("fcar_reports=loud").unwrap_err();
        assert!(err.to_string().contains("invalid LOG_LEVEL 'fcar_reports=loud'"));
    }
}
