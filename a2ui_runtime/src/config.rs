use std::time::Duration;

pub const DEFAULT_CATALOG_ID: &str = "https://a2ui.org/catalog/standard/v0.8";
pub const DEFAULT_PURGE_DELAY: Duration = Duration::from_millis(100);

pub const PURGE_DELAY_ENV: &str = "A2UI_PURGE_DELAY_MS";
pub const DEFAULT_CATALOG_ID_ENV: &str = "A2UI_DEFAULT_CATALOG_ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// How long a deleted surface stays readable before it is purged.
    pub purge_delay: Duration,
    /// Catalog applied when `beginRendering` names none.
    pub default_catalog_id: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            purge_delay: DEFAULT_PURGE_DELAY,
            default_catalog_id: DEFAULT_CATALOG_ID.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Builds a config from a variable lookup. Missing or invalid values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let purge_delay = lookup(PURGE_DELAY_ENV)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.purge_delay);

        let default_catalog_id = lookup(DEFAULT_CATALOG_ID_ENV)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or(defaults.default_catalog_id);

        Self {
            purge_delay,
            default_catalog_id,
        }
    }
}

/// Parses a positive integer setting, e.g. a queue capacity.
pub fn parse_positive(raw: Option<String>) -> Option<usize> {
    raw.and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
}
