//! # Diff
//!
//! Computes the ordered [`Plan`] that moves the remote store from its observed
//! state to the desired state declared in the source tree.
//!
//! Plan order: all creates, then updates, then deletes, then no-ops; by logical
//! name within each phase. Deletes are only planned when pruning is enabled and
//! the name is not protected (unresolved names from failed source files).

use crate::secret::{Checksum, Payload, RemoteSecretState, SecretDocument, VersionToken};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

/// Kind of change a plan item makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Delete,
    NoOp,
}

impl PlanAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no_op",
        }
    }

    /// Whether applying this action writes to the store
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One change to apply, carrying the version observed at diff time
///
/// Items own their payload and are consumed by the engine exactly once.
#[derive(Debug)]
pub enum PlanItem {
    Create {
        name: String,
        payload: Payload,
        checksum: Checksum,
    },
    Update {
        name: String,
        payload: Payload,
        checksum: Checksum,
        expected_version: VersionToken,
        observed_checksum: Option<Checksum>,
    },
    Delete {
        name: String,
        expected_version: VersionToken,
        observed_checksum: Option<Checksum>,
    },
    NoOp {
        name: String,
        version: VersionToken,
        checksum: Checksum,
    },
}

impl PlanItem {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name, .. }
            | Self::Update { name, .. }
            | Self::Delete { name, .. }
            | Self::NoOp { name, .. } => name,
        }
    }

    #[must_use]
    pub fn action(&self) -> PlanAction {
        match self {
            Self::Create { .. } => PlanAction::Create,
            Self::Update { .. } => PlanAction::Update,
            Self::Delete { .. } => PlanAction::Delete,
            Self::NoOp { .. } => PlanAction::NoOp,
        }
    }

    /// Checksum in the store before this item applies
    #[must_use]
    pub fn checksum_before(&self) -> Option<&Checksum> {
        match self {
            Self::Create { .. } => None,
            Self::Update {
                observed_checksum, ..
            }
            | Self::Delete {
                observed_checksum, ..
            } => observed_checksum.as_ref(),
            Self::NoOp { checksum, .. } => Some(checksum),
        }
    }

    /// Checksum in the store once this item has applied
    #[must_use]
    pub fn checksum_after(&self) -> Option<&Checksum> {
        match self {
            Self::Create { checksum, .. }
            | Self::Update { checksum, .. }
            | Self::NoOp { checksum, .. } => Some(checksum),
            Self::Delete { .. } => None,
        }
    }

    /// Version token the write is conditional on
    #[must_use]
    pub fn expected_version(&self) -> Option<&VersionToken> {
        match self {
            Self::Create { .. } => None,
            Self::Update {
                expected_version, ..
            }
            | Self::Delete {
                expected_version, ..
            } => Some(expected_version),
            Self::NoOp { version, .. } => Some(version),
        }
    }

    /// Payload-free view of this item, safe to print or serialize
    #[must_use]
    pub fn describe(&self) -> PlanEntry {
        PlanEntry {
            name: self.name().to_string(),
            action: self.action(),
            expected_version: self.expected_version().cloned(),
            checksum_before: self.checksum_before().cloned(),
            checksum_after: self.checksum_after().cloned(),
        }
    }
}

/// Serializable description of a [`PlanItem`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub name: String,
    pub action: PlanAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<VersionToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_before: Option<Checksum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_after: Option<Checksum>,
}

/// Options that change what the differ plans
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Delete remote secrets that no source document declares
    pub prune_unmanaged: bool,
    /// Names never deleted, whatever `prune_unmanaged` says
    pub protected: BTreeSet<String>,
}

/// Ordered list of plan items
#[derive(Debug, Default)]
pub struct Plan {
    items: Vec<PlanItem>,
}

impl Plan {
    #[must_use]
    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items per action
    #[must_use]
    pub fn counts(&self) -> BTreeMap<PlanAction, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.action()).or_insert(0) += 1;
        }
        counts
    }

    /// Whether applying the plan would write to the store
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.items.iter().any(|item| item.action().is_mutating())
    }

    #[must_use]
    pub fn describe(&self) -> Vec<PlanEntry> {
        self.items.iter().map(PlanItem::describe).collect()
    }

    #[must_use]
    pub fn into_items(self) -> Vec<PlanItem> {
        self.items
    }
}

impl IntoIterator for Plan {
    type Item = PlanItem;
    type IntoIter = std::vec::IntoIter<PlanItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Compare desired documents with observed remote state
///
/// An observed secret without a checksum is treated as different; callers that
/// can fetch payloads should fill the checksum in first.
#[must_use]
pub fn diff(desired: Vec<SecretDocument>, observed: &[RemoteSecretState], options: &DiffOptions) -> Plan {
    let observed: BTreeMap<&str, &RemoteSecretState> =
        observed.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut desired_by_name: BTreeMap<String, SecretDocument> = BTreeMap::new();
    for document in desired {
        if desired_by_name.contains_key(&document.name) {
            warn!("Ignoring second document for {}", document.name);
            continue;
        }
        desired_by_name.insert(document.name.clone(), document);
    }

    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut no_ops = Vec::new();

    for (name, document) in desired_by_name.iter_mut() {
        let payload = std::mem::take(&mut document.payload);
        let checksum = document.checksum.clone();
        match observed.get(name.as_str()) {
            None => creates.push(PlanItem::Create {
                name: name.clone(),
                payload,
                checksum,
            }),
            Some(state) if state.checksum.as_ref() == Some(&checksum) => {
                no_ops.push(PlanItem::NoOp {
                    name: name.clone(),
                    version: state.version.clone(),
                    checksum,
                });
            }
            Some(state) => updates.push(PlanItem::Update {
                name: name.clone(),
                payload,
                checksum,
                expected_version: state.version.clone(),
                observed_checksum: state.checksum.clone(),
            }),
        }
    }

    let deletes = if options.prune_unmanaged {
        observed
            .values()
            .filter(|state| !desired_by_name.contains_key(&state.name))
            .filter(|state| !options.protected.contains(&state.name))
            .map(|state| PlanItem::Delete {
                name: state.name.clone(),
                expected_version: state.version.clone(),
                observed_checksum: state.checksum.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    // BTreeMap iteration already orders each phase by name
    let mut items = creates;
    items.extend(updates);
    items.extend(deletes);
    items.extend(no_ops);
    Plan { items }
}
