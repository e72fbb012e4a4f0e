use tracing::level_filters::LevelFilter;

pub const BROKER_URL: &str = "BROKER_URL";

pub const BROKER_USERNAME: &str = "BROKER_USERNAME";

pub const BROKER_PASSWORD: &str = "BROKER_PASSWORD";

pub const SENSOR_DB_PATH: &str = "SENSOR_DB_PATH";

const LOG_LEVEL: &str = "LOG_LEVEL";

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

pub fn get_log_level() -> LevelFilter {
    let level_from_env = std::env::var(LOG_LEVEL);
    level_from_env.map_or(DEFAULT_LOG_LEVEL, |res| {
        res.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    })
}
