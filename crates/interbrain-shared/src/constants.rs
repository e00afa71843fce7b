/// Application name
pub const APP_NAME: &str = "InterBrain";

/// Descriptor file at the root of every node repository
pub const DESCRIPTOR_FILE: &str = ".udd";

/// Relationship record, present only in contact nodes and never committed
pub const RELATIONSHIP_FILE: &str = "liminal-web.json";

/// Collaboration ledger, one per contact node and never committed
pub const LEDGER_FILE: &str = "collaboration-memory.json";

/// Working-copy files that must never enter version history
pub const PRIVATE_FILES: &[&str] = &[RELATIONSHIP_FILE, LEDGER_FILE];

/// Default branch of every node repository
pub const DEFAULT_BRANCH: &str = "main";

/// Remote name of the local writer copy on the network
pub const WRITER_REMOTE: &str = "rad";

/// Marker prefix of a composition beacon inside a commit message
pub const BEACON_PREFIX: &str = "COHERENCE_BEACON:";

/// Trailer git appends to cherry-picked commits (`git cherry-pick -x`)
pub const CHERRY_PICK_TRAILER: &str = "(cherry picked from commit ";

/// Authority threshold: any single delegate may write
pub const DELEGATE_THRESHOLD: u32 = 1;

/// Multicodec prefix for an ed25519 public key in a `did:key`
pub const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Ledger file format version
pub const LEDGER_VERSION: u32 = 1;

/// Share links older than this are refused (7 days)
pub const SHARE_LINK_TTL_SECS: i64 = 7 * 24 * 3600;

/// Key derivation context (BLAKE3) for simulated commit ids
pub const KDF_CONTEXT_SIM_COMMIT: &str = "interbrain-sim-commit-v1";
