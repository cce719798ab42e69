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

//! Key-mapped sample playback.

pub mod engine;
pub mod envelope;
pub mod library;
pub mod midi;
pub mod notes;
pub mod pool;
pub mod sound;
pub mod state;
pub mod voice;

pub use engine::{ReferencedItem, Sampler, TOO_MANY_SOUNDS};
pub use envelope::EnvelopeParameters;
pub use library::{RebuildStats, MAX_SOUNDS};
pub use midi::MidiBuffer;
pub use notes::NoteSet;
pub use sound::Sound;
pub use state::{SoundEntry, SoundList, SoundListError};
