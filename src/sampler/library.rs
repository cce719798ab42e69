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
use rayon::prelude::*;
use tracing::debug;

use super::sound::Sound;
use super::state::SoundEntry;
use crate::media::MediaResolver;

/// The most sounds a sampler can hold.
pub const MAX_SOUNDS: usize = 64;

/// What a library build did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Sounds that took their audio from the previous library.
    pub reused: usize,
    /// Sounds whose excerpt was read from media.
    pub decoded: usize,
    /// Sounds left silent because their media couldn't be found.
    pub unresolved: usize,
}

/// Builds the sounds for a list of entries.
///
/// Each sound whose content (source, excerpt and media generation) matches a
/// resolved sound in `previous` shares that sound's decoded audio. The rest are
/// decoded in parallel.
pub fn build_sounds(
    entries: &[SoundEntry],
    previous: &[Sound],
    generation: u64,
    resolver: &dyn MediaResolver,
) -> (Vec<Sound>, RebuildStats) {
    let mut stats = RebuildStats::default();
    let mut to_decode = Vec::new();
    let mut sounds = Vec::with_capacity(entries.len().min(MAX_SOUNDS));

    for entry in entries.iter().take(MAX_SOUNDS) {
        let mut sound = Sound::from_entry(entry, generation);
        match previous
            .iter()
            .find(|p| p.is_resolved() && p.content_key() == sound.content_key())
        {
            Some(existing) => {
                sound.adopt(existing);
                stats.reused += 1;
            }
            None => to_decode.push(sounds.len()),
        }
        sounds.push(sound);
    }

    stats.decoded = to_decode.len();
    sounds
        .par_iter_mut()
        .enumerate()
        .filter(|(index, _)| to_decode.binary_search(index).is_ok())
        .for_each(|(_, sound)| sound.decode(resolver));

    stats.unresolved = sounds.iter().filter(|s| !s.is_resolved()).count();
    debug!(
        sounds = sounds.len(),
        reused = stats.reused,
        decoded = stats.decoded,
        unresolved = stats.unresolved,
        "Built sound library"
    );

    (sounds, stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testutil::MemoryResolver;

    fn resolver() -> MemoryResolver {
        let resolver = MemoryResolver::new();
        resolver.insert("a.wav", vec![vec![0.1; 4000]], 1000.0, None);
        resolver.insert("b.wav", vec![vec![0.2; 4000]], 1000.0, None);
        resolver
    }

    #[test]
    fn test_unchanged_rebuild_reads_nothing() {
        let resolver = resolver();
        let entries = vec![
            SoundEntry::new("a.wav", "A", 0.0, 0.0, 0.0),
            SoundEntry::new("b.wav", "B", 1.0, 1.0, 0.0),
        ];

        let (first, stats) = build_sounds(&entries, &[], 0, &resolver);
        assert_eq!(stats.decoded, 2);
        let resolves = resolver.resolves();
        let reads = resolver.reads();

        let (second, stats) = build_sounds(&entries, &first, 0, &resolver);
        assert_eq!(
            stats,
            RebuildStats {
                reused: 2,
                decoded: 0,
                unresolved: 0
            }
        );
        assert_eq!(resolver.resolves(), resolves);
        assert_eq!(resolver.reads(), reads);
        for (old, new) in first.iter().zip(second.iter()) {
            assert!(Arc::ptr_eq(old.audio(), new.audio()));
        }
    }

    #[test]
    fn test_changed_excerpt_is_decoded() {
        let resolver = resolver();
        let mut entries = vec![
            SoundEntry::new("a.wav", "A", 0.0, 0.0, 0.0),
            SoundEntry::new("b.wav", "B", 0.0, 0.0, 0.0),
        ];
        let (first, _) = build_sounds(&entries, &[], 0, &resolver);

        entries[1].start_time = 2.0;
        entries[0].gain_db = 6.0;
        let (second, stats) = build_sounds(&entries, &first, 0, &resolver);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.decoded, 1);
        assert!(Arc::ptr_eq(first[0].audio(), second[0].audio()));
        assert_eq!(second[0].gain_db(), 6.0);
        assert_eq!(second[1].excerpt().audio.num_frames(), 2000 + 32);
    }

    #[test]
    fn test_generation_forces_decode() {
        let resolver = resolver();
        let entries = vec![SoundEntry::new("a.wav", "A", 0.0, 0.0, 0.0)];
        let (first, _) = build_sounds(&entries, &[], 0, &resolver);
        let (second, stats) = build_sounds(&entries, &first, 1, &resolver);
        assert_eq!(stats.decoded, 1);
        assert!(!Arc::ptr_eq(first[0].audio(), second[0].audio()));
    }

    #[test]
    fn test_unresolved_sounds_are_retried() {
        let resolver = resolver();
        let entries = vec![SoundEntry::new("late.wav", "Late", 0.0, 0.0, 0.0)];
        let (first, stats) = build_sounds(&entries, &[], 0, &resolver);
        assert_eq!(stats.unresolved, 1);
        assert!(!first[0].is_playable());

        resolver.insert("late.wav", vec![vec![0.3; 100]], 1000.0, None);
        let (second, stats) = build_sounds(&entries, &first, 0, &resolver);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.unresolved, 0);
        assert!(second[0].is_playable());
    }

    #[test]
    fn test_library_is_capped() {
        let resolver = resolver();
        let entries: Vec<SoundEntry> = (0..MAX_SOUNDS + 3)
            .map(|i| SoundEntry::new("a.wav", &format!("{}", i), 0.0, 0.0, 0.0))
            .collect();
        let (sounds, stats) = build_sounds(&entries, &[], 0, &resolver);
        assert_eq!(sounds.len(), MAX_SOUNDS);
        assert_eq!(stats.decoded, MAX_SOUNDS);
    }
}
