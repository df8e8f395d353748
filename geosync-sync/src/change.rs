//! Change detector.
//!
//! A dataset has changed iff its fresh manifest holds at least one digest the
//! prior manifest does not. Rows that disappeared are counted in
//! [`ChangeRecord::removed`] for diagnostics but do not set `changed` on their
//! own. With no prior manifest at all the dataset is always changed.

use serde::Serialize;

use crate::fingerprint::HashManifest;
use crate::manifest::PriorManifest;

/// Verdict of one comparison. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChangeRecord {
    pub changed: bool,
    /// Digests in the new manifest that are absent from the prior one.
    pub added: usize,
    /// Digests in the prior manifest that are absent from the new one.
    pub removed: usize,
    /// `true` when there was nothing to compare against.
    pub first_sync: bool,
}

pub fn detect_changes(new: &HashManifest, prior: Option<&PriorManifest>) -> ChangeRecord {
    let Some(prior) = prior else {
        return ChangeRecord {
            changed: true,
            added: new.len(),
            removed: 0,
            first_sync: true,
        };
    };

    let added = new.digests().filter(|d| !prior.contains(d)).count();
    let removed = prior.digests().filter(|d| !new.contains_digest(d)).count();
    ChangeRecord {
        changed: added > 0,
        added,
        removed,
        first_sync: false,
    }
}
