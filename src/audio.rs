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
pub mod buffer;
pub mod fade;
pub mod interpolator;
pub mod sample_source;

pub use buffer::AudioBuffer;
pub use fade::FadeCurve;
pub use interpolator::Interpolator;

/// Gains at or below this level in decibels are treated as silence.
const MINUS_INFINITY_DB: f32 = -100.0;

/// Converts a level in decibels to a linear gain factor.
pub fn db_to_gain(db: f32) -> f32 {
    if db > MINUS_INFINITY_DB {
        10.0f32.powf(db * 0.05)
    } else {
        0.0
    }
}

/// Gets the frequency in hertz of a MIDI note number, A4 (69) being 440 Hz.
pub fn midi_note_hz(note: i32) -> f64 {
    440.0 * 2.0f64.powf((note as f64 - 69.0) / 12.0)
}
