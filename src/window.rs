//! Ordered, deduplicated message window.
//!
//! Entries are kept sorted by `(timestamp, arrival sequence)`. Two indexes are
//! maintained incrementally alongside the entries:
//!
//! - `id_index`: server id to entry key, for every entry that has an id.
//! - `fingerprint_index`: tuple identity to entry key, for entries that have
//!   no id yet (pending or failed local sends, id-less pushes).
//!
//! Indexes store entry keys rather than positions; positions are recovered
//! by binary search, so inserting in the middle never invalidates an index.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::message::{Fingerprint, Message, MessageStatus};

/// Position marker for requesting the page before the oldest loaded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub before_id: String,
    pub before_timestamp: i64,
}

/// What a merge did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was added.
    Inserted,
    /// The message was already present; nothing changed.
    Duplicate,
    /// An id-less entry received its server id.
    Promoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryKey {
    timestamp: i64,
    seq: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    key: EntryKey,
    message: Message,
}

/// The loaded slice of a conversation, oldest first.
#[derive(Debug, Default)]
pub struct MessageWindow {
    entries: Vec<Entry>,
    id_index: HashMap<String, EntryKey>,
    fingerprint_index: HashMap<Fingerprint, EntryKey>,
    next_seq: u64,
}

impl MessageWindow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    /// Owned copy of the window in display order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&Message> {
        let key = self.id_index.get(id)?;
        self.position(*key).map(|pos| &self.entries[pos].message)
    }

    #[must_use]
    pub fn get_by_local_key(&self, local_key: Uuid) -> Option<&Message> {
        self.iter().find(|m| m.local_key == local_key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.id_index.clear();
        self.fingerprint_index.clear();
    }

    /// Merge one message, collapsing it onto an existing entry if it is the
    /// same logical message.
    pub fn merge(&mut self, message: Message) -> MergeOutcome {
        let fingerprint = message.fingerprint();

        if let Some(id) = &message.id {
            if self.id_index.contains_key(id) {
                return MergeOutcome::Duplicate;
            }
            if let Some(key) = self.take_unidentified(&fingerprint) {
                self.assign_id(key, id.clone());
                return MergeOutcome::Promoted;
            }
        } else if self.fingerprint_index.contains_key(&fingerprint) {
            return MergeOutcome::Duplicate;
        }

        self.insert(message);
        MergeOutcome::Inserted
    }

    /// Apply a durable-send acknowledgment to the pending entry matching
    /// `fingerprint`.
    ///
    /// If `id` is already present (a push got there first and was stored
    /// separately) the id-less twin is dropped so only one entry remains.
    /// Returns `None` when nothing in the window matches.
    pub fn acknowledge(&mut self, fingerprint: &Fingerprint, id: &str) -> Option<MergeOutcome> {
        if self.id_index.contains_key(id) {
            if let Some(key) = self.take_unidentified(fingerprint) {
                if let Some(pos) = self.position(key) {
                    self.entries.remove(pos);
                }
            }
            return Some(MergeOutcome::Duplicate);
        }

        let key = self.take_unidentified(fingerprint)?;
        self.assign_id(key, id.to_string());
        Some(MergeOutcome::Promoted)
    }

    /// Flag the pending entry matching `fingerprint` as failed.
    pub fn mark_failed(&mut self, fingerprint: &Fingerprint) -> bool {
        let Some(pos) = self
            .fingerprint_index
            .get(fingerprint)
            .and_then(|key| self.position(*key))
        else {
            return false;
        };
        let message = &mut self.entries[pos].message;
        if message.status != MessageStatus::Pending {
            return false;
        }
        message.status = MessageStatus::Failed;
        true
    }

    /// Flip a failed entry back to pending and return a copy of it.
    pub fn mark_retrying(&mut self, local_key: Uuid) -> Option<Message> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| {
                e.message.local_key == local_key && e.message.status == MessageStatus::Failed
            })?;
        entry.message.status = MessageStatus::Pending;
        Some(entry.message.clone())
    }

    /// Cursor for the page preceding the oldest entry that has a server id.
    #[must_use]
    pub fn oldest_cursor(&self) -> Option<Cursor> {
        self.iter().find_map(|m| {
            m.id.as_ref().map(|id| Cursor {
                before_id: id.clone(),
                before_timestamp: m.timestamp,
            })
        })
    }

    fn insert(&mut self, message: Message) {
        let key = EntryKey {
            timestamp: message.timestamp,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        match &message.id {
            Some(id) => {
                self.id_index.insert(id.clone(), key);
            }
            None => {
                self.fingerprint_index.insert(message.fingerprint(), key);
            }
        }

        let pos = self.entries.partition_point(|e| e.key < key);
        self.entries.insert(pos, Entry { key, message });
    }

    fn take_unidentified(&mut self, fingerprint: &Fingerprint) -> Option<EntryKey> {
        self.fingerprint_index.remove(fingerprint)
    }

    fn assign_id(&mut self, key: EntryKey, id: String) {
        if let Some(pos) = self.position(key) {
            let message = &mut self.entries[pos].message;
            message.id = Some(id.clone());
            message.status = MessageStatus::Confirmed;
            self.id_index.insert(id, key);
        }
    }

    fn position(&self, key: EntryKey) -> Option<usize> {
        self.entries.binary_search_by_key(&key, |e| e.key).ok()
    }
}
