use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "filecache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Sizing and sweeping of a single [`FileCache`](crate::caching::FileCache).
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Low watermark: ordinary eviction never shrinks the cache below this many entries.
    pub min_elements: usize,

    /// High watermark: the periodic sweep evicts once the cache holds more entries than this.
    pub max_elements: usize,

    /// If set, an `acquire` that grows the cache to this many entries evicts synchronously in
    /// the calling thread instead of waiting for the next sweep.
    pub hard_limit: Option<usize>,

    /// Interval between background sweeps. `None` disables the background sweep.
    #[serde(with = "humantime_serde")]
    pub period: Option<Duration>,

    /// Whether per-key access counts are recorded for [`FileCache::show_tracking`].
    ///
    /// [`FileCache::show_tracking`]: crate::caching::FileCache::show_tracking
    pub track: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        // Allow 200 - 400 open files, and clean up every 10 minutes.
        Self {
            min_elements: 200,
            max_elements: 400,
            hard_limit: None,
            period: Some(Duration::from_secs(10 * 60)),
            track: false,
        }
    }
}

impl CacheConfig {
    /// Creates a config with the given watermarks and sweep period.
    pub fn new(min_elements: usize, max_elements: usize, period: Option<Duration>) -> Self {
        Self {
            min_elements,
            max_elements,
            period,
            ..Default::default()
        }
        .normalized()
    }

    /// Returns a copy with inconsistent limits corrected.
    ///
    /// The high watermark is raised to the low watermark, a zero sweep period turns the sweep
    /// off, and a zero hard limit means no hard limit.
    pub fn normalized(mut self) -> Self {
        self.max_elements = self.max_elements.max(self.min_elements);
        self.hard_limit = self.hard_limit.filter(|limit| *limit > 0);
        self.period = self.period.filter(|period| !period.is_zero());
        self
    }
}

/// The YAML configuration shared by the caches of a process and the stress tool.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// Named cache configurations.
    ///
    /// Caches which are not listed here use [`CacheConfig::default`].
    pub caches: BTreeMap<String, CacheConfig>,
}

impl Config {
    /// Returns the configuration of the cache called `name`.
    pub fn cache(&self, name: &str) -> CacheConfig {
        self.caches
            .get(name)
            .copied()
            .unwrap_or_default()
            .normalized()
    }

    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
