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
use std::fmt;

/// A set of MIDI note numbers (0 to 127).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NoteSet(u128);

impl NoteSet {
    pub const fn new() -> NoteSet {
        NoteSet(0)
    }

    /// Adds a note. Notes above 127 are ignored.
    pub fn insert(&mut self, note: u8) {
        if note < 128 {
            self.0 |= 1 << note;
        }
    }

    pub fn remove(&mut self, note: u8) {
        if note < 128 {
            self.0 &= !(1 << note);
        }
    }

    pub fn contains(&self, note: u8) -> bool {
        note < 128 && self.0 & (1 << note) != 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the notes in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = u8> + '_ {
        (0..128u8).filter(move |note| self.contains(*note))
    }
}

impl FromIterator<u8> for NoteSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut set = NoteSet::new();
        for note in iter {
            set.insert(note);
        }
        set
    }
}

impl fmt::Debug for NoteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
