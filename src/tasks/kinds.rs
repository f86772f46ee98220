//! Task kinds stored in the queue.
//!
//! The set of kinds is part of the on-disk contract: `KnownTask` is the closed
//! union of them and `KnownTask::decode` is the only place a kind string is
//! mapped to a decoder.

use super::errors::CodecError;
use super::task::{decode, QueueTask};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Remove a set of document keys from one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveFromIndexTask {
    pub index: i64,
    pub keys: BTreeSet<String>,
}

impl RemoveFromIndexTask {
    pub fn new<I, S>(index: i64, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            index,
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl QueueTask for RemoveFromIndexTask {
    const KIND: &'static str = "remove_from_index";

    fn target_index(&self) -> Option<i64> {
        Some(self.index)
    }

    fn separate_by_index(&self) -> bool {
        true
    }

    fn weight(&self) -> usize {
        self.keys.len()
    }

    fn merge(&mut self, other: Self) {
        self.keys.extend(other.keys);
    }
}

/// Re-check documents that reference the given keys, touching them when the
/// referenced document changed since the recorded etag.
///
/// References are not tied to one index, so pending tasks of this kind merge
/// across every index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchReferencingDocumentsTask {
    pub index: Option<i64>,
    /// Referenced key -> etag observed when the reference was recorded.
    pub references: BTreeMap<String, u64>,
}

impl TouchReferencingDocumentsTask {
    pub fn new<I, S>(index: Option<i64>, references: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            index,
            references: references.into_iter().map(|(k, e)| (k.into(), e)).collect(),
        }
    }
}

impl QueueTask for TouchReferencingDocumentsTask {
    const KIND: &'static str = "touch_referencing_documents";

    fn target_index(&self) -> Option<i64> {
        self.index
    }

    fn separate_by_index(&self) -> bool {
        false
    }

    fn weight(&self) -> usize {
        self.references.len()
    }

    fn merge(&mut self, other: Self) {
        for (key, etag) in other.references {
            let entry = self.references.entry(key).or_insert(etag);
            if etag > *entry {
                *entry = etag;
            }
        }
    }
}

/// Every task kind this crate knows how to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownTask {
    RemoveFromIndex(RemoveFromIndexTask),
    TouchReferencingDocuments(TouchReferencingDocumentsTask),
}

impl KnownTask {
    pub const KINDS: &'static [&'static str] = &[
        RemoveFromIndexTask::KIND,
        TouchReferencingDocumentsTask::KIND,
    ];

    pub fn is_known_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }

    pub fn decode(kind: &str, bytes: &[u8]) -> Result<Self, CodecError> {
        match kind {
            RemoveFromIndexTask::KIND => decode(kind, bytes).map(KnownTask::RemoveFromIndex),
            TouchReferencingDocumentsTask::KIND => {
                decode(kind, bytes).map(KnownTask::TouchReferencingDocuments)
            }
            _ => Err(CodecError::UnknownKind(kind.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KnownTask::RemoveFromIndex(_) => RemoveFromIndexTask::KIND,
            KnownTask::TouchReferencingDocuments(_) => TouchReferencingDocumentsTask::KIND,
        }
    }

    pub fn weight(&self) -> usize {
        match self {
            KnownTask::RemoveFromIndex(task) => task.weight(),
            KnownTask::TouchReferencingDocuments(task) => task.weight(),
        }
    }

    pub fn target_index(&self) -> Option<i64> {
        match self {
            KnownTask::RemoveFromIndex(task) => task.target_index(),
            KnownTask::TouchReferencingDocuments(task) => task.target_index(),
        }
    }
}
