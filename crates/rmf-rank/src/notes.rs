//! Community note validation and per-user note storage.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use rmf_core::{CommunityNote, ParishRecord};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub type NoteMap = BTreeMap<String, Vec<CommunityNote>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteRejected {
    #[error("comment is empty")]
    EmptyComment,
    #[error("rating {0} is outside 1..=5")]
    RatingOutOfRange(i64),
}

pub fn validate_note(rating: i64, comment: &str) -> Result<CommunityNote, NoteRejected> {
    let comment = comment.trim();
    if comment.is_empty() {
        return Err(NoteRejected::EmptyComment);
    }
    if !(1..=5).contains(&rating) {
        return Err(NoteRejected::RatingOutOfRange(rating));
    }
    Ok(CommunityNote {
        rating: rating as u8,
        comment: comment.to_string(),
    })
}

/// Stored note as read from disk, before validation. Wide integer rating so a
/// single out-of-range entry cannot fail the whole document.
#[derive(Debug, Deserialize)]
struct StoredNote {
    rating: i64,
    comment: String,
}

/// Storage for user-submitted notes, keyed by parish id.
pub trait NoteRepository {
    fn get(&self, parish_id: &str) -> Vec<CommunityNote>;

    fn append(&mut self, parish_id: &str, note: CommunityNote) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryNoteStore {
    notes: NoteMap,
}

impl InMemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NoteRepository for InMemoryNoteStore {
    fn get(&self, parish_id: &str) -> Vec<CommunityNote> {
        self.notes.get(parish_id).cloned().unwrap_or_default()
    }

    fn append(&mut self, parish_id: &str, note: CommunityNote) -> anyhow::Result<()> {
        self.notes.entry(parish_id.to_string()).or_default().push(note);
        Ok(())
    }
}

/// Single JSON document mapping parish id to notes. Read whole, replaced
/// whole; an unreadable document counts as empty.
#[derive(Debug, Clone)]
pub struct JsonFileNoteStore {
    path: PathBuf,
}

impl JsonFileNoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> NoteMap {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return NoteMap::new(),
        };
        match serde_json::from_str::<BTreeMap<String, Value>>(&text) {
            Ok(raw) => raw
                .into_iter()
                .map(|(parish_id, notes)| (parish_id, valid_notes(notes)))
                .collect(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "discarding malformed note store");
                NoteMap::new()
            }
        }
    }

    fn save(&self, notes: &NoteMap) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating note store directory {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(notes).context("serializing note store")?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, bytes)
            .with_context(|| format!("writing {}", temp_path.display()))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))
    }
}

// Entries that are not notes, or fail validation, are skipped one by one.
fn valid_notes(notes: Value) -> Vec<CommunityNote> {
    let Value::Array(entries) = notes else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<StoredNote>(entry).ok())
        .filter_map(|note| validate_note(note.rating, &note.comment).ok())
        .collect()
}

impl NoteRepository for JsonFileNoteStore {
    fn get(&self, parish_id: &str) -> Vec<CommunityNote> {
        self.load().remove(parish_id).unwrap_or_default()
    }

    fn append(&mut self, parish_id: &str, note: CommunityNote) -> anyhow::Result<()> {
        let mut notes = self.load();
        notes.entry(parish_id.to_string()).or_default().push(note);
        self.save(&notes)
    }
}

/// Overlay stored notes onto records: a non-empty stored list replaces the
/// record's own notes.
pub fn merge_saved_notes<R: NoteRepository + ?Sized>(parishes: &[ParishRecord], repo: &R) -> Vec<ParishRecord> {
    parishes
        .iter()
        .map(|parish| {
            let stored = repo.get(&parish.id);
            let mut parish = parish.clone();
            if !stored.is_empty() {
                parish.community_notes = stored;
            }
            parish
        })
        .collect()
}

/// Store `note` for `parish`. The first stored note for a parish carries the
/// parish's existing notes along, since stored lists override on merge.
pub fn persist_note<R: NoteRepository + ?Sized>(
    repo: &mut R,
    parish: &ParishRecord,
    note: CommunityNote,
) -> anyhow::Result<()> {
    if repo.get(&parish.id).is_empty() {
        for existing in &parish.community_notes {
            repo.append(&parish.id, existing.clone())?;
        }
    }
    repo.append(&parish.id, note)
}
