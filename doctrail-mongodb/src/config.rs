//! Connection settings for the MongoDB backend.

use std::time::Duration;

use mongodb::options::ReadPreference;
use serde::Deserialize;

/// Default bound on how long shutdown waits for the driver to close its pool.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server selection mode for reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    #[default]
    SecondaryPreferred,
    Nearest,
}

impl From<ReadPreferenceMode> for ReadPreference {
    fn from(mode: ReadPreferenceMode) -> Self {
        match mode {
            ReadPreferenceMode::Primary => ReadPreference::Primary,
            ReadPreferenceMode::PrimaryPreferred => ReadPreference::PrimaryPreferred {
                options: Default::default(),
            },
            ReadPreferenceMode::Secondary => ReadPreference::Secondary {
                options: Default::default(),
            },
            ReadPreferenceMode::SecondaryPreferred => ReadPreference::SecondaryPreferred {
                options: Default::default(),
            },
            ReadPreferenceMode::Nearest => ReadPreference::Nearest {
                options: Default::default(),
            },
        }
    }
}

/// Serde-loadable settings for [`MongoDbStoreBuilder`](crate::MongoDbStoreBuilder).
///
/// Every field is optional in the serialized form:
///
/// ```ignore
/// let config: MongoDbConfig = serde_json::from_str(r#"{
///     "uri": "mongodb://db:27017",
///     "database": "app",
///     "max_pool_size": 50,
///     "read_preference": "primary"
/// }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MongoDbConfig {
    /// Connection string, e.g. `mongodb://localhost:27017`.
    pub uri: String,
    /// Database every collection lives in.
    pub database: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
    /// Seconds a pooled connection may stay idle before it is closed.
    pub max_idle_time_secs: Option<u64>,
    pub app_name: Option<String>,
    pub read_preference: ReadPreferenceMode,
    /// Seconds shutdown waits for in-flight work before giving up.
    pub shutdown_grace_secs: u64,
}

impl Default for MongoDbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: String::new(),
            max_pool_size: None,
            min_pool_size: None,
            max_idle_time_secs: None,
            app_name: None,
            read_preference: ReadPreferenceMode::default(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
        }
    }
}

impl MongoDbConfig {
    pub fn max_idle_time(&self) -> Option<Duration> {
        self.max_idle_time_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
