//! The descriptor file (`.udd`) stored at the root of every node repository.

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;
use crate::types::{PeerId, Rid};

/// What a node represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Content node, shared on the network.
    Dream,
    /// Contact node, one per known peer, local-only.
    Dreamer,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dream => "dream",
            Self::Dreamer => "dreamer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub id: Rid,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Primary media reference, relative to the node root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dream_talk: Option<String>,
    /// Child RIDs (nested repositories).
    #[serde(default)]
    pub submodules: Vec<Rid>,
    /// Parent RIDs (repositories this node is nested in).
    #[serde(default)]
    pub supermodules: Vec<Rid>,
    /// Contact nodes: the peer this node stands for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerId>,
    /// Contact nodes: free-text contact information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Locally-private relationship field. Never taken from a peer's fork.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Rid>,
}

impl Descriptor {
    pub fn content(id: Rid, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            kind: NodeKind::Dream,
            dream_talk: None,
            submodules: Vec::new(),
            supermodules: Vec::new(),
            peer: None,
            contact: None,
            relationships: Vec::new(),
        }
    }

    pub fn contact(id: Rid, alias: impl Into<String>, peer: PeerId) -> Self {
        Self {
            kind: NodeKind::Dreamer,
            peer: Some(peer),
            ..Self::content(id, alias)
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, DescriptorError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Vec<u8> {
        // A struct of strings and vectors always serializes.
        let mut out = serde_json::to_vec_pretty(self).unwrap_or_default();
        out.push(b'\n');
        out
    }

    /// Append a child RID unless already present. Returns whether it changed.
    pub fn add_child(&mut self, rid: &Rid) -> bool {
        push_unique(&mut self.submodules, rid)
    }

    /// Append a parent RID unless already present. Returns whether it changed.
    pub fn add_parent(&mut self, rid: &Rid) -> bool {
        push_unique(&mut self.supermodules, rid)
    }

    pub fn remove_child(&mut self, rid: &Rid) -> bool {
        remove_all(&mut self.submodules, rid)
    }

    pub fn remove_parent(&mut self, rid: &Rid) -> bool {
        remove_all(&mut self.supermodules, rid)
    }

    pub fn has_child(&self, rid: &Rid) -> bool {
        self.submodules.contains(rid)
    }

    pub fn has_parent(&self, rid: &Rid) -> bool {
        self.supermodules.contains(rid)
    }
}

fn push_unique(list: &mut Vec<Rid>, rid: &Rid) -> bool {
    if list.contains(rid) {
        return false;
    }
    list.push(rid.clone());
    true
}

fn remove_all(list: &mut Vec<Rid>, rid: &Rid) -> bool {
    let before = list.len();
    list.retain(|r| r != rid);
    list.len() != before
}
