//! Network identifier.

use crate::error::TypesError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Identifies which network a node participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public beta network.
    Beta,
    /// Local test network. Timings shrink and weight floors are relaxed.
    Test,
}

impl NetworkId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Beta => "beta",
            Self::Test => "test",
        }
    }

    pub fn is_test_network(&self) -> bool {
        matches!(self, Self::Test)
    }

    /// Unit that election timings are expressed in.
    pub fn base_latency(&self) -> Duration {
        if self.is_test_network() {
            Duration::from_millis(25)
        } else {
            Duration::from_millis(1000)
        }
    }
}

impl FromStr for NetworkId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "beta" => Ok(Self::Beta),
            "test" => Ok(Self::Test),
            other => Err(TypesError::UnknownNetwork(other.to_string())),
        }
    }
}
