//! Metadata merge policy for concurrent descriptor edits.

use crate::descriptor::Descriptor;

/// Resolve a descriptor conflict between two forks.
///
/// The incoming fork (`theirs`) is canonical for every field except
/// `relationships`, which is private to the local working copy and always
/// comes from `ours`. The ancestor does not influence the result.
pub fn merge_descriptors(_ancestor: Option<&Descriptor>, ours: &Descriptor, theirs: &Descriptor) -> Descriptor {
    Descriptor {
        relationships: ours.relationships.clone(),
        ..theirs.clone()
    }
}
