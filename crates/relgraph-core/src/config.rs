use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::eventstore::DEFAULT_STREAM_TTL_MINUTES;
use crate::projection::subscription::DEFAULT_BATCH_SIZE;
use crate::scheduler::{MAX_MINUTES_BETWEEN_EMAILS, MailboxLimits};

pub const CONFIG_FILE_NAME: &str = "relgraph.toml";
pub const GRAPH_PATH_ENV: &str = "RELGRAPH_GRAPH_PATH";
pub const EVENT_STORE_PATH_ENV: &str = "RELGRAPH_EVENT_STORE_PATH";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelgraphConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub event_store: EventStoreConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub scheduler: MailboxLimits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            path: default_graph_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl GraphConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStoreConfig {
    #[serde(default = "default_event_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_stream_ttl_minutes")]
    pub default_stream_ttl_minutes: i64,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            path: default_event_store_path(),
            default_stream_ttl_minutes: default_stream_ttl_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl RelgraphConfig {
    /// Resolve the configuration.
    ///
    /// An explicit path must exist. Without one, `./relgraph.toml` is tried,
    /// then `relgraph/config.toml` under the user config directory, then the
    /// defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Self::from_file(path)?
            }
            None => match discover() {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("read {}: {err}", path.display())))?;
        let config = Self::from_toml(&content)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| Error::Config(format!("parse config: {err}")))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| Error::Config(format!("render config: {err}")))
    }

    /// Apply `RELGRAPH_GRAPH_PATH` and `RELGRAPH_EVENT_STORE_PATH` as looked
    /// up by `lookup`. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(path) = non_blank(GRAPH_PATH_ENV) {
            self.graph.path = PathBuf::from(path);
        }
        if let Some(path) = non_blank(EVENT_STORE_PATH_ENV) {
            self.event_store.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_store.default_stream_ttl_minutes <= 0 {
            return Err(Error::Config(format!(
                "event_store.default_stream_ttl_minutes must be positive, got {}",
                self.event_store.default_stream_ttl_minutes
            )));
        }
        if self.projection.batch_size == 0 {
            return Err(Error::Config(
                "projection.batch_size must be positive".to_string(),
            ));
        }
        if self.scheduler.emails_per_mailbox_per_day <= 0 {
            return Err(Error::Config(format!(
                "scheduler.emails_per_mailbox_per_day must be positive, got {}",
                self.scheduler.emails_per_mailbox_per_day
            )));
        }
        if !(0..=MAX_MINUTES_BETWEEN_EMAILS).contains(&self.scheduler.min_minutes_between_emails) {
            return Err(Error::Config(format!(
                "scheduler.min_minutes_between_emails must be between 0 and {MAX_MINUTES_BETWEEN_EMAILS}, got {}",
                self.scheduler.min_minutes_between_emails
            )));
        }
        Ok(())
    }
}

fn discover() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("relgraph").join("config.toml"))
        .filter(|path| path.exists())
}

fn default_graph_path() -> PathBuf {
    PathBuf::from(".relgraph/graph.db")
}

fn default_event_store_path() -> PathBuf {
    PathBuf::from(".relgraph/events.db")
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_stream_ttl_minutes() -> i64 {
    DEFAULT_STREAM_TTL_MINUTES
}

const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
