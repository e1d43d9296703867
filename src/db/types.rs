//! Row types stored in the tag index
//!
//! # Types
//!
//! - **`HostStatus`**: lifecycle status of a host, stored as a small integer
//! - **`Host`**: a host row together with its resolved source and status
//! - **`Tables`**: which tables a leaf condition reads from

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a host
///
/// The discriminant is the value stored in `hosts.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostStatus {
    Pending = 0,
    Running = 1,
    ShuttingDown = 2,
    Terminated = 3,
    Stopping = 4,
    Stopped = 5,
}

impl HostStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Running,
        Self::ShuttingDown,
        Self::Terminated,
        Self::Stopping,
        Self::Stopped,
    ];

    #[must_use]
    pub const fn id(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.id() == id)
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host of the current cache generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub status: HostStatus,
}

/// Tables a condition needs joined in to be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tables {
    /// `hosts` only
    Hosts,
    /// `hosts_tags` joined with `tags`
    Tags,
    /// `hosts_tags` joined with both `hosts` and `tags`
    Both,
}

impl Tables {
    /// The `SELECT … FROM …` prefix yielding a `host_id` column for this table set
    #[must_use]
    pub const fn select_prefix(self) -> &'static str {
        match self {
            Self::Hosts => "SELECT hosts.id AS host_id FROM hosts",
            Self::Tags => {
                "SELECT DISTINCT hosts_tags.host_id AS host_id FROM hosts_tags \
                 INNER JOIN tags ON hosts_tags.tag_id = tags.id"
            }
            Self::Both => {
                "SELECT DISTINCT hosts_tags.host_id AS host_id FROM hosts_tags \
                 INNER JOIN hosts ON hosts_tags.host_id = hosts.id \
                 INNER JOIN tags ON hosts_tags.tag_id = tags.id"
            }
        }
    }
}
