//! Encrypted journal entries and the in-memory entry store.
//!
//! The store only ever holds ciphertext. It knows how to index, order and
//! (de)serialize [`EncryptedEntry`] records; encryption happens in the
//! session before a record reaches it.
//!
//! Persisted form (`vault.entries`) is a JSON array of
//! `{id, title, ciphertext, nonce, timestamp}` with base64 byte fields and
//! an epoch-millisecond timestamp.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Opaque unique entry identifier (random UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A journal entry as it is stored: plaintext title, sealed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEntry {
    pub id: EntryId,
    /// Stored unencrypted.
    pub title: String,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Kept as loose bytes so a damaged nonce surfaces as an authentication
    /// failure at decrypt time rather than a parse error for the whole vault.
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// Last save, epoch milliseconds.
    pub timestamp: i64,
}

impl EncryptedEntry {
    /// Title, id and timestamp without the ciphertext.
    #[must_use]
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            id: self.id,
            title: self.title.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Listing view of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub title: String,
    pub timestamp: i64,
}

/// A successfully decrypted entry.
///
/// Only the vault session can build one, so anything that accepts a
/// `DecryptedEntry` is guaranteed to run after a verified decrypt. The body
/// is wiped from memory on drop.
pub struct DecryptedEntry {
    id: EntryId,
    title: String,
    body: Zeroizing<String>,
    timestamp: i64,
}

impl DecryptedEntry {
    pub(crate) fn new(entry: &EncryptedEntry, body: String) -> Self {
        Self {
            id: entry.id,
            title: entry.title.clone(),
            body: Zeroizing::new(body),
            timestamp: entry.timestamp,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl fmt::Debug for DecryptedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedEntry")
            .field("id", &self.id)
            .field("body", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Id-indexed collection of encrypted entries, listed newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryStore {
    entries: HashMap<EntryId, EncryptedEntry>,
}

impl EntryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &EntryId) -> Option<&EncryptedEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert or replace by id. Returns the replaced record, if any.
    pub fn upsert(&mut self, entry: EncryptedEntry) -> Option<EncryptedEntry> {
        self.entries.insert(entry.id, entry)
    }

    pub fn remove(&mut self, id: &EntryId) -> Option<EncryptedEntry> {
        self.entries.remove(id)
    }

    /// All entries, newest first. Equal timestamps fall back to id order so
    /// the listing is stable.
    pub fn list_sorted_by_timestamp_desc(&self) -> Vec<&EncryptedEntry> {
        let mut sorted: Vec<&EncryptedEntry> = self.entries.values().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        sorted
    }

    pub fn summaries(&self) -> Vec<EntrySummary> {
        self.list_sorted_by_timestamp_desc()
            .into_iter()
            .map(EncryptedEntry::summary)
            .collect()
    }

    /// Parse a persisted `vault.entries` blob.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Malformed`] if the blob is not a valid entry array.
    /// - [`StoreError::DuplicateId`] if two records share an id.
    pub fn load(blob: &[u8]) -> Result<Self, StoreError> {
        let records: Vec<EncryptedEntry> =
            serde_json::from_slice(blob).map_err(|e| StoreError::Malformed {
                reason: e.to_string(),
            })?;

        let mut entries = HashMap::with_capacity(records.len());
        for record in records {
            let id = record.id;
            if entries.insert(id, record).is_some() {
                return Err(StoreError::DuplicateId { id: id.to_string() });
            }
        }
        Ok(Self { entries })
    }

    /// Serialize to the persisted blob, newest entry first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] if JSON encoding fails.
    pub fn serialize(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(&self.list_sorted_by_timestamp_desc()).map_err(|e| {
            StoreError::Serialize {
                reason: e.to_string(),
            }
        })
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
