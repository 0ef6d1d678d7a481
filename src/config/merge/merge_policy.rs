//! Merge rules: defaults first, later sources override earlier ones key by key.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the built-in defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("queue.max_size", 1000_i64)?
        .set_default("queue.history_size", 500_i64)?
        .set_default("verification.strict", true)?
        .set_default("verification.min_score", 80_i64)?
        .set_default("logging.level", "info")
}
