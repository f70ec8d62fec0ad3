use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `debug` or `info`.
/// Fails if a subscriber is already installed.
pub fn init(debug: bool, json: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::util::SubscriberInitExt;

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(debug));

    if json {
        builder.json().with_current_span(false).finish().try_init()
    } else {
        builder.with_target(false).finish().try_init()
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("etag_tracker={level},warn")))
}

/// Routes log output through the test harness so it shows only for failing tests.
#[cfg(test)]
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("etag_tracker=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_levels() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        use tracing_subscriber::filter::LevelFilter;
        assert_eq!(env_filter(true).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(env_filter(false).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_second_init_fails() {
        init_for_tests();
        assert!(init(false, false).is_err());
    }
}
