use std::env;
use tracing_subscriber::filter::LevelFilter;

/// Level used when `LOG_LEVEL` is unset.
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::INFO;

/// Maps a `LOG_LEVEL` value to a filter. Unparseable values fall back to debug
/// so a typo shows more output, not less.
pub fn level_from(raw: Option<&str>) -> LevelFilter {
    let Some(raw) = raw else {
        return DEFAULT_LEVEL;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "warning" => LevelFilter::WARN,
        "fatal" | "panic" => LevelFilter::ERROR,
        other => other.parse().unwrap_or(LevelFilter::DEBUG),
    }
}

pub fn init() {
    let level = level_from(env::var("LOG_LEVEL").ok().as_deref());
    tracing_subscriber::fmt().with_max_level(level).init();
}
