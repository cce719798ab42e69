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

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Names a MIDI note, with 60 as middle C (C4).
pub fn note_display(note: i32) -> String {
    let note = note.clamp(0, 127);
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], note / 12 - 1)
}

/// Outputs seconds in a minutes:seconds.milliseconds format.
pub fn seconds_display(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let minutes = millis / 60_000;
    let secs = (millis / 1000) % 60;
    format!("{}:{:02}.{:03}", minutes, secs, millis % 1000)
}
