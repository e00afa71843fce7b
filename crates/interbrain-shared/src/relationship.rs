use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Rid;

/// Private record of the nodes a contact is linked to (`liminal-web.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRecord {
    /// Ordered, duplicate-free.
    pub relationships: Vec<Rid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

impl RelationshipRecord {
    /// Explicit linking action. Returns whether the record changed.
    pub fn link(&mut self, rid: &Rid) -> bool {
        if self.relationships.contains(rid) {
            return false;
        }
        self.relationships.push(rid.clone());
        true
    }

    /// Explicit unlinking action. Automated sync never calls this.
    pub fn unlink(&mut self, rid: &Rid) -> bool {
        let before = self.relationships.len();
        self.relationships.retain(|r| r != rid);
        before != self.relationships.len()
    }

    /// Non-destructive synchronization: adds missing entries, never removes.
    /// Returns the number of entries added.
    pub fn sync_from<'a>(&mut self, rids: impl IntoIterator<Item = &'a Rid>, now: DateTime<Utc>) -> usize {
        let added = rids.into_iter().filter(|rid| self.link(rid)).count();
        self.last_synced = Some(now);
        added
    }

    pub fn contains(&self, rid: &Rid) -> bool {
        self.relationships.contains(rid)
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }
}
