//! Queue configuration
//!
//! Queues can be built programmatically or from a TOML file with a `[queue]` table.
//!
//! # File layout
//!
//! ```toml
//! [queue]
//! name = "thumbnails"
//! max_concurrent = 3        # positive integer or "unbounded"
//! workers = 8               # 0 = run on the shared pool
//! ```
//!
//! # Usage
//!
//! ```rust
//! use opqueue::util::config::{ConcurrencyLimit, QueueConfig};
//!
//! let config = QueueConfig::from_toml_str("[queue]\nmax_concurrent = 3").unwrap();
//! assert_eq!(config.max_concurrent, ConcurrencyLimit::Bounded(3));
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::scheduler::{SchedulerError, SchedulerResult};

const UNBOUNDED: &str = "unbounded";

/// Cap on simultaneously executing tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawLimit", into = "RawLimit")]
pub enum ConcurrencyLimit {
    /// No cap.
    #[default]
    Unbounded,
    /// At most this many tasks at once.
    Bounded(usize),
}

impl ConcurrencyLimit {
    /// The cap as a count; unbounded maps to `usize::MAX`.
    #[inline]
    pub fn as_count(self) -> usize {
        match self {
            ConcurrencyLimit::Unbounded => usize::MAX,
            ConcurrencyLimit::Bounded(n) => n,
        }
    }
}

/// On-disk form: a positive integer or the word `unbounded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Count(i64),
    Word(String),
}

impl TryFrom<RawLimit> for ConcurrencyLimit {
    type Error = String;

    fn try_from(raw: RawLimit) -> Result<Self, Self::Error> {
        match raw {
            RawLimit::Count(n) if n > 0 => Ok(ConcurrencyLimit::Bounded(n as usize)),
            RawLimit::Count(n) => Err(format!("max_concurrent must be positive, got {}", n)),
            RawLimit::Word(word) if word == UNBOUNDED => Ok(ConcurrencyLimit::Unbounded),
            RawLimit::Word(word) => Err(format!(
                "max_concurrent must be a positive integer or \"{}\", got \"{}\"",
                UNBOUNDED, word
            )),
        }
    }
}

impl From<ConcurrencyLimit> for RawLimit {
    fn from(limit: ConcurrencyLimit) -> Self {
        match limit {
            // A cap too large for a TOML integer cannot be reached either.
            ConcurrencyLimit::Bounded(n) => match i64::try_from(n) {
                Ok(n) => RawLimit::Count(n),
                Err(_) => RawLimit::Word(UNBOUNDED.to_string()),
            },
            ConcurrencyLimit::Unbounded => RawLimit::Word(UNBOUNDED.to_string()),
        }
    }
}

/// Configuration for one [`TaskQueue`](crate::TaskQueue).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used in logs and as the worker thread prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Concurrency cap
    #[serde(default)]
    pub max_concurrent: ConcurrencyLimit,
    /// Dedicated worker threads; 0 runs tasks on the shared pool
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    queue: QueueConfig,
}

impl QueueConfig {
    /// Set the queue name
    pub fn with_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Cap the queue at `max_concurrent` executing tasks
    pub fn with_max_concurrent(
        mut self,
        max_concurrent: usize,
    ) -> Self {
        self.max_concurrent = ConcurrencyLimit::Bounded(max_concurrent);
        self
    }

    /// Give the queue its own pool of `workers` threads
    pub fn with_workers(
        mut self,
        workers: usize,
    ) -> Self {
        self.workers = workers;
        self
    }

    /// Reject a zero cap
    pub fn validate(&self) -> SchedulerResult<()> {
        match self.max_concurrent {
            ConcurrencyLimit::Bounded(0) => Err(SchedulerError::InvalidConcurrency(0)),
            _ => Ok(()),
        }
    }

    /// Parse the `[queue]` table of a TOML document
    pub fn from_toml_str(content: &str) -> SchedulerResult<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        file.queue.validate()?;
        Ok(file.queue)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as a TOML document with a `[queue]` table
    pub fn to_toml_string(&self) -> SchedulerResult<String> {
        let file = ConfigFile {
            queue: self.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Save to a TOML file
    pub fn save(
        &self,
        path: impl AsRef<Path>,
    ) -> SchedulerResult<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}
