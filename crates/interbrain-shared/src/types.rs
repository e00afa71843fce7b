use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::ED25519_MULTICODEC;
use crate::error::IdentityError;

// Peer identity: `did:key:z…` for network peers, `local:<uuid>` for contacts
// that have no network identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    const DID_PREFIX: &'static str = "did:key:z";
    const LOCAL_PREFIX: &'static str = "local:";

    /// Derive the `did:key` of an ed25519 public key (multicodec + base58btc).
    pub fn from_public_key(key: &[u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(34);
        bytes.extend_from_slice(&ED25519_MULTICODEC);
        bytes.extend_from_slice(key);
        Self(format!("{}{}", Self::DID_PREFIX, bs58::encode(bytes).into_string()))
    }

    /// A fresh identity for a contact that is not (yet) on the network.
    pub fn local() -> Self {
        Self(format!("{}{}", Self::LOCAL_PREFIX, Uuid::new_v4()))
    }

    /// Recover the ed25519 public key of a `did:key` identity.
    pub fn public_key(&self) -> Option<[u8; 32]> {
        let encoded = self.0.strip_prefix(Self::DID_PREFIX)?;
        let bytes = bs58::decode(encoded).into_vec().ok()?;
        if bytes.len() != 34 || bytes[..2] != ED25519_MULTICODEC {
            return None;
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[2..]);
        Some(key)
    }

    pub fn is_local_only(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }

    /// Node id as used by Radicle (`z6Mk…`), i.e. the did without its method.
    pub fn node_id(&self) -> &str {
        self.0.strip_prefix("did:key:").unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> String {
        let id = self.node_id();
        id[id.len().saturating_sub(8)..].to_string()
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with(Self::LOCAL_PREFIX) && s.len() > Self::LOCAL_PREFIX.len() {
            return Ok(Self(s.to_string()));
        }
        // bare node ids are accepted and normalized to a did
        let did = if s.starts_with('z') {
            format!("did:key:{s}")
        } else {
            s.to_string()
        };
        let peer = Self(did);
        if peer.public_key().is_none() {
            return Err(IdentityError::InvalidPeerId(s.to_string()));
        }
        Ok(peer)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Repository identifier, immutable for the repository's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Rid(String);

impl Rid {
    /// Wrap an identifier assigned by the network (`rad:z…`) or loaded from disk.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    /// A fresh identifier for a node that is never pushed.
    pub fn local() -> Self {
        Self(format!("local:{}", Uuid::new_v4()))
    }

    pub fn is_local_only(&self) -> bool {
        self.0.starts_with("local:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier without its `rad:` scheme, as used in `rad://` urls.
    pub fn urn_body(&self) -> &str {
        self.0.strip_prefix("rad:").unwrap_or(&self.0)
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Rid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A commit id as reported by the VCS engine (lowercase hex).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChangeHash(String);

impl ChangeHash {
    /// Validate a raw commit id. Abbreviated ids (>= 7 chars) are accepted.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.len() < 7 || raw.len() > 64 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(raw.to_ascii_lowercase()))
    }

    /// Hex-encode a raw digest as a commit id.
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a node is served to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VisibilityScope {
    /// Only globally-followed peers may fetch the node.
    #[default]
    Followed,
    /// Any requester may fetch the node.
    Open,
}

impl VisibilityScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Followed => "followed",
            Self::Open => "all",
        }
    }
}

impl FromStr for VisibilityScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "followed" | "restricted-to-followed" => Ok(Self::Followed),
            "all" | "open" => Ok(Self::Open),
            other => Err(format!("unknown visibility scope: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_key_roundtrip() {
        let key = [7u8; 32];
        let peer = PeerId::from_public_key(&key);
        assert!(peer.as_str().starts_with("did:key:z6Mk"));
        assert_eq!(peer.public_key(), Some(key));

        let parsed: PeerId = peer.as_str().parse().unwrap();
        assert_eq!(parsed, peer);

        let from_nid: PeerId = peer.node_id().parse().unwrap();
        assert_eq!(from_nid, peer);
    }

    #[test]
    fn test_local_peer() {
        let peer = PeerId::local();
        assert!(peer.is_local_only());
        assert!(peer.public_key().is_none());
        assert_eq!(peer.as_str().parse::<PeerId>().unwrap(), peer);
    }

    #[test]
    fn test_invalid_peer_rejected() {
        assert!("did:key:zNotAKey".parse::<PeerId>().is_err());
        assert!("".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_change_hash_validation() {
        assert!(ChangeHash::parse("abc").is_none());
        assert!(ChangeHash::parse("zzzzzzzz").is_none());
        let h = ChangeHash::parse("ABCDEF0123456789").unwrap();
        assert_eq!(h.as_str(), "abcdef0123456789");
        assert_eq!(h.short(), "abcdef01");
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("open".parse::<VisibilityScope>().unwrap(), VisibilityScope::Open);
        assert_eq!(
            "followed".parse::<VisibilityScope>().unwrap(),
            VisibilityScope::Followed
        );
        assert!("friends".parse::<VisibilityScope>().is_err());
    }
}
