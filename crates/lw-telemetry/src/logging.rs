use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Install the global subscriber, writing to stderr so stdout stays free for
/// the session report line.
///
/// `RUST_LOG` overrides `default_level` (for example "info" or
/// "lw_daemon=debug,warn"). Only the first call installs anything.
pub fn init_logging(service_name: &str, default_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match format {
        LogFormat::Pretty => builder.compact().try_init().is_ok(),
        LogFormat::Json => builder.json().with_current_span(false).try_init().is_ok(),
    };
    if installed {
        tracing::info!(service = service_name, ?format, "logging ready");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_picks_format() {
        assert_eq!(LogFormat::from_json_flag(true), LogFormat::Json);
        assert_eq!(LogFormat::from_json_flag(false), LogFormat::Pretty);
    }

    #[test]
    fn second_init_is_a_no_op() {
        init_logging("lw-test", "debug", LogFormat::Pretty);
        init_logging("lw-test", "info", LogFormat::Json);
    }
}
