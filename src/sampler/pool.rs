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
use super::voice::Voice;
use crate::audio::AudioBuffer;

/// The default maximum number of simultaneous voices.
pub const MAX_VOICES: usize = 32;

/// A fixed number of voice slots, allocated up front.
/// When every slot is in use new voices are refused; nothing is stolen.
pub struct VoicePool {
    slots: Vec<Option<Voice>>,
    active: usize,
}

impl VoicePool {
    pub fn new(capacity: usize) -> VoicePool {
        VoicePool {
            slots: (0..capacity).map(|_| None).collect(),
            active: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn is_full(&self) -> bool {
        self.active >= self.slots.len()
    }

    /// Puts a voice in a free slot. Returns false, dropping the voice, if the pool is full.
    pub fn allocate(&mut self, voice: Voice) -> bool {
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(voice);
                self.active += 1;
                true
            }
            None => false,
        }
    }

    /// Stops every voice immediately.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.active = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.slots.iter_mut().flatten()
    }

    /// Renders every voice into `out`, last slot first, and frees the slots of
    /// voices that have finished.
    pub fn render(
        &mut self,
        out: &mut AudioBuffer,
        start: usize,
        num: usize,
        scratch: &mut AudioBuffer,
    ) {
        for slot in self.slots.iter_mut().rev() {
            let finished = match slot {
                Some(voice) => {
                    voice.render(out, start, num, scratch);
                    voice.is_finished()
                }
                None => false,
            };
            if finished {
                *slot = None;
                self.active -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sampler::envelope::EnvelopeParameters;
    use crate::sampler::voice::{scratch_buffer, VoiceStart};

    fn voice(note: u8, frames: usize) -> Voice {
        Voice::new(
            Arc::new(AudioBuffer::from_channels(vec![vec![0.1; frames]])),
            44100.0,
            44100.0,
            EnvelopeParameters::default(),
            VoiceStart {
                note,
                key_note: 60,
                gain_db: 0.0,
                pan: 0.0,
                open_ended: false,
                velocity: 1.0,
                delay: 0,
                length: frames,
            },
        )
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut pool = VoicePool::new(MAX_VOICES);
        for i in 0..MAX_VOICES + 8 {
            let allocated = pool.allocate(voice(60, 1000));
            assert_eq!(allocated, i < MAX_VOICES);
        }
        assert_eq!(pool.len(), MAX_VOICES);
        assert!(pool.is_full());

        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.iter().count(), 0);
        assert_eq!(pool.capacity(), MAX_VOICES);
    }

    #[test]
    fn test_render_retires_finished_voices() {
        let mut pool = VoicePool::new(4);
        assert!(pool.allocate(voice(60, 10)));
        assert!(pool.allocate(voice(62, 100000)));

        let mut out = AudioBuffer::new(2, 256);
        let mut scratch = scratch_buffer();
        pool.render(&mut out, 0, 256, &mut scratch);

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.iter().map(|v| v.note()).collect::<Vec<_>>(), vec![62]);
        assert!(out.magnitude(0, 256) > 0.0);

        // The freed slot is reused.
        assert!(pool.allocate(voice(64, 1000)));
        assert_eq!(pool.len(), 2);
        for voice in pool.iter_mut() {
            voice.trigger_release();
        }
        assert!(pool.iter().all(|v| v.is_release_triggered()));
    }
}
