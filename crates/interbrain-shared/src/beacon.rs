//! Composition beacons embedded in commit messages.
//!
//! A beacon announces that a node was nested inside another one. Peers that
//! fetch the parent's history learn about the child by reading beacons, not
//! by being told directly.

use serde::{Deserialize, Serialize};

use crate::constants::BEACON_PREFIX;
use crate::types::Rid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BeaconKind {
    /// The committing node now contains the named node as a submodule.
    Supermodule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    #[serde(rename = "type")]
    pub kind: BeaconKind,
    #[serde(rename = "radicleId")]
    pub rid: Rid,
    pub title: String,
}

impl Beacon {
    pub fn composition(rid: Rid, title: impl Into<String>) -> Self {
        Self {
            kind: BeaconKind::Supermodule,
            rid,
            title: title.into(),
        }
    }

    /// Render the single beacon line.
    pub fn to_line(&self) -> String {
        // Only strings and a unit enum: serialization cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{BEACON_PREFIX} {json}")
    }

    /// Full commit message: subject, blank line, beacon.
    pub fn commit_message(&self, subject: &str) -> String {
        format!("{subject}\n\n{}", self.to_line())
    }

    /// Extract every well-formed beacon from a commit message. Malformed
    /// beacon lines are ignored.
    pub fn parse_all(message: &str) -> Vec<Beacon> {
        message
            .lines()
            .filter_map(|line| line.trim().strip_prefix(BEACON_PREFIX))
            .filter_map(|json| serde_json::from_str(json.trim()).ok())
            .collect()
    }
}
