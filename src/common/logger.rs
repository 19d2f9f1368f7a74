use log::LevelFilter;

/// Initialise the global logger. `RUST_LOG` overrides `default_level`.
pub fn init(default_level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level);
    builder.parse_default_env();
    // A second init (tests, embedding) is harmless.
    let _ = builder.try_init();
}

/// Parse a level name from the command line, defaulting to `info`.
pub fn parse_level(name: &str) -> LevelFilter {
    name.parse().unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), LevelFilter::Info);
    }
}
