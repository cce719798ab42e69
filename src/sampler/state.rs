// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// One sound in the persisted sound list.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SoundEntry {
    /// A file path or project media id.
    pub source: String,

    #[serde(default)]
    pub name: String,

    /// Seconds into the source.
    #[serde(default)]
    pub start_time: f64,

    /// Seconds to play. Zero or less means to the end of the source.
    #[serde(default)]
    pub length: f64,

    /// The note that plays the audio at its recorded pitch.
    /// When unset the media's root note is used, or 72.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_note: Option<i32>,

    /// Lowest note mapped to this sound. Defaults to two octaves below the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_note: Option<i32>,

    /// Highest note mapped to this sound. Defaults to two octaves above the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_note: Option<i32>,

    #[serde(default)]
    pub gain_db: f32,

    #[serde(default)]
    pub pan: f32,

    /// Plays to the end regardless of note off.
    #[serde(default)]
    pub open_ended: bool,

    /// Identifies this entry in the live library for as long as it's in the list.
    #[serde(skip)]
    id: u64,
}

impl SoundEntry {
    pub fn new(source: &str, name: &str, start_time: f64, length: f64, gain_db: f32) -> Self {
        Self {
            source: source.to_string(),
            name: name.to_string(),
            start_time,
            length,
            key_note: None,
            min_note: None,
            max_note: None,
            gain_db,
            pan: 0.0,
            open_ended: false,
            id: next_entry_id(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

fn next_entry_id() -> u64 {
    NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, thiserror::Error)]
pub enum SoundListError {
    #[error("Invalid sound list: {0}")]
    Json(#[from] serde_json::Error),
}

/// The ordered list of sounds a sampler plays.
#[derive(Clone, Debug, Default)]
pub struct SoundList {
    entries: Vec<SoundEntry>,
}

impl SoundList {
    pub fn new() -> SoundList {
        SoundList::default()
    }

    /// Creates a list from entries, giving each a fresh identity.
    pub fn from_entries(entries: Vec<SoundEntry>) -> SoundList {
        let mut list = SoundList {
            entries: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            list.push(entry);
        }
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SoundEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SoundEntry> {
        self.entries.get_mut(index)
    }

    pub fn entries(&self) -> &[SoundEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SoundEntry> {
        self.entries.iter()
    }

    /// Appends an entry and returns its identity.
    pub fn push(&mut self, mut entry: SoundEntry) -> u64 {
        entry.id = next_entry_id();
        let id = entry.id;
        self.entries.push(entry);
        id
    }

    pub fn remove(&mut self, index: usize) -> Option<SoundEntry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub fn to_json(&self) -> Result<String, SoundListError> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    pub fn from_json(json: &str) -> Result<SoundList, SoundListError> {
        let entries: Vec<SoundEntry> = serde_json::from_str(json)?;
        Ok(SoundList::from_entries(entries))
    }
}
