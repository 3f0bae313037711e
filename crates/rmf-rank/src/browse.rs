//! Browse session state: the working set of parishes evolves only through
//! `reduce`, never through shared mutable state.

use rmf_core::{CommunityNote, ParishRecord, WeightConfig};

use crate::notes::{merge_saved_notes, persist_note, validate_note, NoteRepository};
use crate::{apply_search, rank, results_summary, seed_parishes, RankedParish};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasetOrigin {
    #[default]
    Seed,
    Synced,
    Live,
}

#[derive(Debug, Clone, Default)]
pub struct BrowseState {
    pub base: Vec<ParishRecord>,
    pub origin: DatasetOrigin,
    pub working_set: Vec<ParishRecord>,
    pub query: String,
    pub selected_details: Vec<String>,
    pub weights: WeightConfig,
}

impl BrowseState {
    pub fn ranked(&self) -> Vec<RankedParish> {
        rank(self.working_set.clone(), &self.weights)
    }

    pub fn summary(&self) -> String {
        let mut text = results_summary(&self.ranked(), &self.query);
        match self.origin {
            DatasetOrigin::Synced => text.push_str(" Source: synced parish dataset."),
            DatasetOrigin::Live => text.push_str(" Source: live Google Places search."),
            DatasetOrigin::Seed => {}
        }
        text
    }
}

#[derive(Debug, Clone)]
pub enum BrowseEvent {
    /// Dataset fetched from the server; an empty list falls back to the
    /// built-in seed parishes.
    DatasetLoaded(Vec<ParishRecord>),
    WeightsChanged(WeightConfig),
    DetailsChanged {
        query: String,
        details: Vec<String>,
    },
    /// A submitted search with whatever the live lookup returned.
    SearchSubmitted {
        query: String,
        live: Vec<ParishRecord>,
    },
    NoteAdded {
        parish_id: String,
        note: CommunityNote,
    },
}

/// Pure transition. `notes` is only read, to overlay stored notes.
pub fn reduce<R: NoteRepository + ?Sized>(state: BrowseState, event: BrowseEvent, notes: &R) -> BrowseState {
    match event {
        BrowseEvent::DatasetLoaded(parishes) => {
            let (base, origin) = if parishes.is_empty() {
                (seed_parishes(), DatasetOrigin::Seed)
            } else {
                (parishes, DatasetOrigin::Synced)
            };
            let working_set = merge_saved_notes(&base, notes);
            BrowseState {
                base,
                origin,
                working_set,
                query: String::new(),
                ..state
            }
        }
        BrowseEvent::WeightsChanged(weights) => BrowseState { weights, ..state },
        BrowseEvent::DetailsChanged { query, details } => {
            let working_set = apply_search(&merge_saved_notes(&state.base, notes), &query, &details);
            BrowseState {
                working_set,
                query: query.trim().to_string(),
                selected_details: details,
                ..state
            }
        }
        BrowseEvent::SearchSubmitted { query, live } => {
            let (source, origin) = if live.is_empty() {
                (state.base.clone(), base_origin(&state))
            } else {
                (live, DatasetOrigin::Live)
            };
            let working_set = apply_search(&merge_saved_notes(&source, notes), &query, &state.selected_details);
            BrowseState {
                working_set,
                origin,
                query: query.trim().to_string(),
                ..state
            }
        }
        BrowseEvent::NoteAdded { parish_id, note } => {
            let mut state = state;
            if let Some(parish) = state.working_set.iter_mut().find(|p| p.id == parish_id) {
                parish.community_notes.push(note);
            }
            state
        }
    }
}

fn base_origin(state: &BrowseState) -> DatasetOrigin {
    match state.origin {
        DatasetOrigin::Live if state.base.is_empty() => DatasetOrigin::Seed,
        DatasetOrigin::Live => DatasetOrigin::Synced,
        other => other,
    }
}

/// Owns the state and the note repository; persists notes before reducing.
pub struct BrowseSession<R: NoteRepository> {
    state: BrowseState,
    notes: R,
}

impl<R: NoteRepository> BrowseSession<R> {
    pub fn new(notes: R) -> Self {
        Self {
            state: BrowseState::default(),
            notes,
        }
    }

    pub fn state(&self) -> &BrowseState {
        &self.state
    }

    pub fn notes(&self) -> &R {
        &self.notes
    }

    pub fn dispatch(&mut self, event: BrowseEvent) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, event, &self.notes);
    }

    /// Validate and record a note. Invalid input or an unknown parish is
    /// dropped without error; returns whether the note was recorded.
    pub fn submit_note(&mut self, parish_id: &str, rating: i64, comment: &str) -> anyhow::Result<bool> {
        let Ok(note) = validate_note(rating, comment) else {
            return Ok(false);
        };
        let Some(parish) = self.state.working_set.iter().find(|p| p.id == parish_id).cloned() else {
            return Ok(false);
        };
        persist_note(&mut self.notes, &parish, note.clone())?;
        self.dispatch(BrowseEvent::NoteAdded {
            parish_id: parish_id.to_string(),
            note,
        });
        Ok(true)
    }
}
