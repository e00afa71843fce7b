//! Types shared by every InterBrain crate: identifiers, the node descriptor,
//! the relationship record, composition beacons, the descriptor merge policy,
//! the local signing identity and signed share links.

pub mod beacon;
pub mod constants;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod merge;
pub mod relationship;
pub mod share;
pub mod types;

pub use beacon::Beacon;
pub use descriptor::{Descriptor, NodeKind};
pub use error::{DescriptorError, IdentityError, ShareLinkError};
pub use identity::Identity;
pub use merge::merge_descriptors;
pub use relationship::RelationshipRecord;
pub use share::ShareLink;
pub use types::{ChangeHash, PeerId, Rid, VisibilityScope};
