use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid peer identity: {0}")]
    InvalidPeerId(String),

    #[error("Key file error: {0}")]
    KeyFile(String),
}

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Malformed descriptor: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Descriptor id mismatch: expected {expected}, found {found}")]
    IdMismatch { expected: String, found: String },
}

#[derive(Error, Debug)]
pub enum ShareLinkError {
    #[error("Invalid share link format")]
    InvalidFormat,

    #[error("Share link has expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signer is not a usable public key")]
    SignerMismatch,

    #[error("Base64 decode error")]
    Base64Decode,
}
