use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::constants::SHARE_LINK_TTL_SECS;
use crate::error::ShareLinkError;
use crate::identity::{verify_signature, Identity};
use crate::types::{PeerId, Rid};

const URI_PREFIX: &str = "interbrain://share/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharePayload {
    /// Network identity of the sender: the peer to follow and fetch from.
    pub sender: PeerId,
    /// Key that signed the payload. The network key stays with the node
    /// software, so the daemon signs with its own.
    pub signer: PeerId,
    pub sender_alias: Option<String>,
    pub rids: Vec<Rid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A signed link handing one or more nodes to another person. Receiving one
/// is how most peers are first encountered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareLink {
    pub payload: SharePayload,
    pub signature: Vec<u8>,
}

impl ShareLink {
    /// Create a link from `sender`, signed by `identity`.
    pub fn create(
        identity: &Identity,
        sender: PeerId,
        alias: Option<String>,
        rids: Vec<Rid>,
    ) -> Result<Self, ShareLinkError> {
        let now = Utc::now();
        let payload = SharePayload {
            sender,
            signer: identity.peer_id(),
            sender_alias: alias,
            rids,
            created_at: now,
            expires_at: now + Duration::seconds(SHARE_LINK_TTL_SECS),
        };

        let payload_bytes =
            bincode::serialize(&payload).map_err(|_| ShareLinkError::InvalidFormat)?;
        let signature = identity.sign(&payload_bytes);

        Ok(Self {
            payload,
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Encode the link as a copiable `interbrain://share/<base64url>` uri.
    pub fn encode(&self) -> Result<String, ShareLinkError> {
        let bytes = bincode::serialize(self).map_err(|_| ShareLinkError::InvalidFormat)?;
        Ok(format!("{URI_PREFIX}{}", base64_url_encode(&bytes)))
    }

    /// Decode a uri (or its bare code) back into a link. Does not verify.
    pub fn decode(link: &str) -> Result<Self, ShareLinkError> {
        let code = link.trim();
        let code = code.strip_prefix(URI_PREFIX).unwrap_or(code);
        let bytes = base64_url_decode(code)?;
        bincode::deserialize(&bytes).map_err(|_| ShareLinkError::InvalidFormat)
    }

    /// Verify expiry and that the signer's key signed the payload.
    pub fn verify(&self) -> Result<(), ShareLinkError> {
        if Utc::now() > self.payload.expires_at {
            return Err(ShareLinkError::Expired);
        }
        if self.payload.signer.public_key().is_none() {
            return Err(ShareLinkError::SignerMismatch);
        }

        let payload_bytes =
            bincode::serialize(&self.payload).map_err(|_| ShareLinkError::InvalidFormat)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| ShareLinkError::InvalidSignature)?;

        verify_signature(&self.payload.signer, &payload_bytes, &signature)
            .map_err(|_| ShareLinkError::InvalidSignature)
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, ShareLinkError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|_| ShareLinkError::Base64Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_link_roundtrip() {
        let identity = Identity::generate();
        let rids = vec![Rid::new("rad:z1"), Rid::new("rad:z2")];

        let link = ShareLink::create(&identity, identity.peer_id(), Some("Ada".into()), rids.clone()).unwrap();
        let uri = link.encode().unwrap();
        assert!(uri.starts_with("interbrain://share/"));

        let decoded = ShareLink::decode(&uri).expect("decode should work");
        decoded.verify().expect("verify should pass");
        assert_eq!(decoded.payload.rids, rids);
        assert_eq!(decoded.payload.sender, identity.peer_id());
        assert_eq!(decoded.payload.sender_alias.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_sender_may_differ_from_signer() {
        let daemon = Identity::generate();
        let node = Identity::generate().peer_id();

        let link = ShareLink::create(&daemon, node.clone(), None, vec![Rid::new("rad:z1")]).unwrap();
        let decoded = ShareLink::decode(&link.encode().unwrap()).unwrap();
        decoded.verify().expect("signed by the daemon key");
        assert_eq!(decoded.payload.sender, node);
        assert_eq!(decoded.payload.signer, daemon.peer_id());
    }

    #[test]
    fn test_tampered_link_fails() {
        let identity = Identity::generate();
        let link = ShareLink::create(&identity, identity.peer_id(), None, vec![Rid::new("rad:z1")]).unwrap();

        let mut bad = link.clone();
        bad.payload.rids.push(Rid::new("rad:injected"));
        assert!(bad.verify().is_err());

        let mut redirected = link.clone();
        redirected.payload.sender = Identity::generate().peer_id();
        assert!(redirected.verify().is_err());

        let mut spoofed = link;
        spoofed.payload.signer = Identity::generate().peer_id();
        assert!(spoofed.verify().is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            ShareLink::decode("interbrain://share/%%%"),
            Err(ShareLinkError::Base64Decode)
        ));
    }
}
