//! Task attribute model
//!
//! Everything a provider needs to build a worker fleet, plus the fields it
//! fills in when the fleet is read back (addresses, status, events).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

/// Desired and observed state of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskAttributes {
    pub environment: Environment,
    pub size: Size,
    pub firewall: Firewall,
    pub spot: Spot,
    /// Desired number of identical workers
    pub parallelism: u16,
    /// Provider-specific identity reference (instance profile, service account...)
    pub permission_set: String,
    pub tags: BTreeMap<String, String>,

    #[serde(skip_deserializing)]
    pub addresses: Vec<IpAddr>,
    #[serde(skip_deserializing)]
    pub status: Status,
    #[serde(skip_deserializing)]
    pub events: Vec<Event>,
}

impl Default for TaskAttributes {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            size: Size::default(),
            firewall: Firewall::default(),
            spot: Spot::ON_DEMAND,
            parallelism: 1,
            permission_set: String::new(),
            tags: BTreeMap::new(),
            addresses: Vec::new(),
            status: Status::default(),
            events: Vec::new(),
        }
    }
}

/// Parallelism captured by [`TaskAttributes::suspend_parallelism`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the saved parallelism must be handed back to restore_parallelism"]
pub struct SavedParallelism(u16);

impl SavedParallelism {
    pub fn value(self) -> u16 {
        self.0
    }
}

impl TaskAttributes {
    /// Zero the desired parallelism, returning the previous value
    pub fn suspend_parallelism(&mut self) -> SavedParallelism {
        let saved = SavedParallelism(self.parallelism);
        self.parallelism = 0;
        saved
    }

    pub fn restore_parallelism(&mut self, saved: SavedParallelism) {
        self.parallelism = saved.0;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub image: String,
    pub script: String,
    /// `None` inherits the value from the local process environment
    pub variables: BTreeMap<String, Option<String>>,
    /// Local directory pushed to the task before it starts
    pub directory: String,
    /// Subdirectory of `directory` pulled back on deletion
    pub directory_out: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            image: "ubuntu".to_string(),
            script: String::new(),
            variables: BTreeMap::new(),
            directory: String::new(),
            directory_out: String::new(),
            timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Environment {
    /// Variables with inherited values filled in from the current process
    pub fn resolved_variables(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Some(value) => value.clone(),
                    None => std::env::var(name).unwrap_or_default(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Size {
    /// Generic size (`s`, `m`, `l`, `xl`, `m+v100`...) or a provider machine type
    pub machine: String,
    /// Disk size in GB
    pub storage: u32,
}

impl Default for Size {
    fn default() -> Self {
        Self {
            machine: "m".to_string(),
            storage: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Firewall {
    pub ingress: FirewallRule,
    pub egress: FirewallRule,
}

impl Default for Firewall {
    fn default() -> Self {
        Self {
            ingress: FirewallRule {
                ports: vec![22, 80],
                nets: Vec::new(),
            },
            egress: FirewallRule::default(),
        }
    }
}

/// Empty `nets` means any address; empty `ports` means any port
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallRule {
    pub ports: Vec<u16>,
    pub nets: Vec<String>,
}

/// Spot bid: negative is on-demand, zero is the market price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Spot(pub f64);

impl Spot {
    pub const ON_DEMAND: Spot = Spot(-1.0);
    pub const MARKET: Spot = Spot(0.0);

    pub fn is_on_demand(self) -> bool {
        self.0 < 0.0
    }

    /// Maximum price, `None` when bidding the market price or on-demand
    pub fn max_price(self) -> Option<f64> {
        (self.0 > 0.0).then_some(self.0)
    }
}

impl Default for Spot {
    fn default() -> Self {
        Spot::ON_DEMAND
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    Active,
    Succeeded,
    Failed,
}

/// Worker counts per status code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(BTreeMap<StatusCode, u32>);

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: StatusCode) -> u32 {
        self.0.get(&code).copied().unwrap_or(0)
    }

    pub fn set(&mut self, code: StatusCode, count: u32) {
        self.0.insert(code, count);
    }

    pub fn increment(&mut self, code: StatusCode) {
        *self.0.entry(code).or_insert(0) += 1;
    }

    pub fn with(mut self, code: StatusCode, count: u32) -> Self {
        self.set(code, count);
        self
    }
}

/// Remote storage of one task, as seen by workers and the sync engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageCredentials {
    /// Object store URL, store options included
    pub remote: String,
    /// Provider credentials exported to workers
    pub env: BTreeMap<String, String>,
}

/// Timestamped provider event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub code: String,
    pub description: Vec<String>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
