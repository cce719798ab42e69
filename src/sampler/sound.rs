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
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::state::SoundEntry;
use crate::audio::fade::{apply_crossfade_section, FadeCurve};
use crate::audio::AudioBuffer;
use crate::media::{MediaResolver, SourceRef};

/// The shortest excerpt, in sample periods of the source.
pub const MIN_EXCERPT_SAMPLES: f64 = 32.0;

/// Silent frames appended after every excerpt.
pub const TAIL_PADDING: usize = 32;

/// Key note used when neither the sound nor its media names one.
pub const DEFAULT_KEY_NOTE: i32 = 72;

/// How far either side of the key note a sound's range reaches by default.
pub const DEFAULT_NOTE_SPAN: i32 = 24;

/// Frames read from the media at a time.
const READ_CHUNK_FRAMES: usize = 8192;

const FADE_IN_FRAMES: usize = 30;

/// Excerpts starting louder than this get a fade-in.
const FADE_IN_THRESHOLD: f32 = 0.01;

/// Everything the decoded audio of a sound depends on.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentKey {
    pub source: String,
    pub start_time: f64,
    pub length: f64,
    /// Bumped whenever the media behind every source may have changed.
    pub generation: u64,
}

/// The decoded audio of an excerpt and where it came from.
#[derive(Clone, Debug)]
pub struct DecodedExcerpt {
    /// The excerpt plus [TAIL_PADDING] frames of silence.
    pub audio: Arc<AudioBuffer>,
    pub sample_rate: f64,
    pub start_sample: u64,
    pub length_samples: u64,
    /// The clamped excerpt, in seconds.
    pub start_time: f64,
    pub length: f64,
    pub root_note: Option<u8>,
}

impl Default for DecodedExcerpt {
    fn default() -> Self {
        Self {
            audio: Arc::new(AudioBuffer::default()),
            sample_rate: 0.0,
            start_sample: 0,
            length_samples: 0,
            start_time: 0.0,
            length: 0.0,
            root_note: None,
        }
    }
}

/// Clamps an excerpt to media of the given duration, returning the start time and length.
/// A length of zero or less selects everything from the start time onwards.
pub fn clamp_excerpt(start_time: f64, length: f64, duration: f64, sample_rate: f64) -> (f64, f64) {
    let min_length = MIN_EXCERPT_SAMPLES / sample_rate;
    let start_time = if start_time.is_finite() { start_time } else { 0.0 };
    let start_time = start_time.clamp(0.0, (duration - min_length).max(0.0));
    let remaining = (duration - start_time).max(0.0);

    let length = if length.is_finite() && length > 0.0 {
        length.clamp(min_length.min(remaining), remaining)
    } else {
        remaining
    };

    (start_time, length)
}

/// A sound in the live library: a mapped note range and its decoded excerpt.
#[derive(Clone, Debug)]
pub struct Sound {
    id: u64,
    name: String,
    source: String,
    content_key: ContentKey,
    requested_key_note: Option<i32>,
    requested_min_note: Option<i32>,
    requested_max_note: Option<i32>,
    key_note: i32,
    min_note: i32,
    max_note: i32,
    gain_db: f32,
    pan: f32,
    open_ended: bool,
    excerpt: DecodedExcerpt,
    resolved: bool,
}

impl Sound {
    /// Creates a sound for an entry with no audio yet.
    pub fn from_entry(entry: &SoundEntry, generation: u64) -> Sound {
        let mut sound = Sound {
            id: entry.id(),
            name: entry.name.clone(),
            source: entry.source.clone(),
            content_key: ContentKey {
                source: entry.source.clone(),
                start_time: entry.start_time,
                length: entry.length,
                generation,
            },
            requested_key_note: entry.key_note,
            requested_min_note: entry.min_note,
            requested_max_note: entry.max_note,
            key_note: DEFAULT_KEY_NOTE,
            min_note: 0,
            max_note: 0,
            gain_db: entry.gain_db.clamp(-48.0, 48.0),
            pan: entry.pan.clamp(-1.0, 1.0),
            open_ended: entry.open_ended,
            excerpt: DecodedExcerpt::default(),
            resolved: false,
        };
        sound.resolve_mapping();
        sound
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn content_key(&self) -> &ContentKey {
        &self.content_key
    }

    pub fn key_note(&self) -> i32 {
        self.key_note
    }

    pub fn min_note(&self) -> i32 {
        self.min_note
    }

    pub fn max_note(&self) -> i32 {
        self.max_note
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn is_open_ended(&self) -> bool {
        self.open_ended
    }

    pub fn excerpt(&self) -> &DecodedExcerpt {
        &self.excerpt
    }

    pub fn audio(&self) -> &Arc<AudioBuffer> {
        &self.excerpt.audio
    }

    pub fn sample_rate(&self) -> f64 {
        self.excerpt.sample_rate
    }

    /// Whether the source was found when the excerpt was last decoded.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Whether there's any audio to play.
    pub fn is_playable(&self) -> bool {
        !self.excerpt.audio.is_empty()
    }

    pub fn covers(&self, note: i32) -> bool {
        self.min_note <= note && note <= self.max_note
    }

    /// Takes the decoded audio of a previous sound with the same content.
    pub fn adopt(&mut self, previous: &Sound) {
        self.excerpt = previous.excerpt.clone();
        self.resolved = previous.resolved;
        self.resolve_mapping();
    }

    /// Resolves the source and reads the excerpt into a fresh buffer.
    /// An unresolvable source leaves the sound silent.
    pub fn decode(&mut self, resolver: &dyn MediaResolver) {
        self.excerpt = DecodedExcerpt::default();
        self.resolved = false;

        let source = SourceRef::parse(&self.source);
        let Some(mut reader) = resolver.resolve(&source) else {
            warn!(sound = self.name, source = %source, "Unable to find media for sound");
            self.resolve_mapping();
            return;
        };

        let sample_rate = reader.sample_rate();
        let frames = reader.length_in_frames();
        if sample_rate <= 0.0 || frames == 0 {
            warn!(sound = self.name, source = %source, "Media has no audio");
            self.resolve_mapping();
            return;
        }
        self.resolved = true;

        let (start_time, length) = clamp_excerpt(
            self.content_key.start_time,
            self.content_key.length,
            frames as f64 / sample_rate,
            sample_rate,
        );
        let start_sample = ((start_time * sample_rate).round() as u64).min(frames);
        let length_samples = ((length * sample_rate).round() as u64).min(frames - start_sample);

        let mut audio = AudioBuffer::new(
            reader.num_channels(),
            length_samples as usize + TAIL_PADDING,
        );

        let mut offset = 0;
        while offset < length_samples as usize {
            let num = (length_samples as usize - offset).min(READ_CHUNK_FRAMES);
            if let Err(e) = reader.read(start_sample + offset as u64, &mut audio, offset, num) {
                error!(
                    sound = self.name,
                    source = %source,
                    offset,
                    error = %e,
                    "Failed to read sound excerpt"
                );
                debug_assert!(false, "failed to read sound excerpt: {}", e);
                break;
            }
            offset += num;
        }

        // A quick fade-in if the excerpt starts away from zero.
        if audio.magnitude(0, 1) > FADE_IN_THRESHOLD {
            apply_crossfade_section(&mut audio, 0, FADE_IN_FRAMES, FadeCurve::Concave, 0.0, 1.0);
        }

        debug!(
            sound = self.name,
            source = %source,
            start_time,
            length,
            frames = length_samples,
            "Decoded sound excerpt"
        );

        self.excerpt = DecodedExcerpt {
            audio: Arc::new(audio),
            sample_rate,
            start_sample,
            length_samples,
            start_time,
            length,
            root_note: reader.root_note(),
        };
        self.resolve_mapping();
    }

    /// Works out the key note and range from the entry, falling back to the media's root note.
    fn resolve_mapping(&mut self) {
        let key_note = self
            .requested_key_note
            .or_else(|| self.excerpt.root_note.map(i32::from))
            .unwrap_or(DEFAULT_KEY_NOTE)
            .clamp(0, 127);
        let min_note = self
            .requested_min_note
            .unwrap_or(key_note - DEFAULT_NOTE_SPAN)
            .clamp(0, 127);
        let max_note = self
            .requested_max_note
            .unwrap_or(key_note + DEFAULT_NOTE_SPAN)
            .clamp(0, 127);

        self.key_note = key_note;
        self.min_note = min_note.min(max_note);
        self.max_note = min_note.max(max_note);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryResolver;

    #[test]
    fn test_clamp_excerpt() {
        let min = MIN_EXCERPT_SAMPLES / 1000.0;

        assert_eq!(clamp_excerpt(0.5, 1.0, 2.0, 1000.0), (0.5, 1.0));
        // Zero or negative length runs to the end.
        assert_eq!(clamp_excerpt(0.5, 0.0, 2.0, 1000.0), (0.5, 1.5));
        assert_eq!(clamp_excerpt(0.5, -1.0, 2.0, 1000.0), (0.5, 1.5));
        // Lengths are clamped to the media and to the minimum.
        assert_eq!(clamp_excerpt(1.5, 10.0, 2.0, 1000.0), (1.5, 0.5));
        assert_eq!(clamp_excerpt(0.0, 0.001, 2.0, 1000.0), (0.0, min));
        // Start times are kept far enough from the end for a minimum excerpt.
        let (start, length) = clamp_excerpt(5.0, 1.0, 2.0, 1000.0);
        assert!((start - (2.0 - min)).abs() < 1e-12);
        assert!((length - min).abs() < 1e-12);
        assert_eq!(clamp_excerpt(-1.0, 1.0, 2.0, 1000.0), (0.0, 1.0));
        // Media shorter than the minimum.
        assert_eq!(clamp_excerpt(0.0, 1.0, 0.01, 1000.0), (0.0, 0.01));
        assert_eq!(clamp_excerpt(f64::NAN, 0.0, 2.0, 1000.0), (0.0, 2.0));
    }

    #[test]
    fn test_decode_excerpt() {
        let resolver = MemoryResolver::new();
        let ramp: Vec<f32> = (0..20000).map(|i| i as f32 / 20000.0).collect();
        resolver.insert("ramp.wav", vec![ramp.clone(), ramp], 10000.0, None);

        let mut entry = SoundEntry::new("ramp.wav", "Ramp", 0.5, 1.0, 0.0);
        entry.min_note = Some(40);
        let mut sound = Sound::from_entry(&entry, 0);
        sound.decode(&resolver);

        assert!(sound.is_resolved());
        assert!(sound.is_playable());
        let excerpt = sound.excerpt();
        assert_eq!(excerpt.start_sample, 5000);
        assert_eq!(excerpt.length_samples, 10000);
        assert_eq!(excerpt.audio.num_channels(), 2);
        assert_eq!(excerpt.audio.num_frames(), 10000 + TAIL_PADDING);
        // Reads were chunked, but the audio is continuous.
        assert_eq!(resolver.reads(), 2);
        assert_eq!(excerpt.audio.channel(1)[9000], 14000.0 / 20000.0);
        assert!(excerpt.audio.channel(0)[10000..].iter().all(|s| *s == 0.0));

        // The excerpt starts at 0.25, so it's faded in.
        assert_eq!(excerpt.audio.channel(0)[0], 0.0);
        assert!(excerpt.audio.channel(0)[15] < 0.25);
        assert_eq!(excerpt.audio.channel(0)[30], 5030.0 / 20000.0);

        assert_eq!(sound.key_note(), DEFAULT_KEY_NOTE);
        assert_eq!(sound.min_note(), 40);
        assert_eq!(sound.max_note(), 96);
        assert!(sound.covers(40));
        assert!(!sound.covers(39));
    }

    #[test]
    fn test_quiet_start_is_not_faded() {
        let resolver = MemoryResolver::new();
        resolver.insert("quiet.wav", vec![vec![0.005; 1000]], 1000.0, None);

        let mut sound = Sound::from_entry(&SoundEntry::new("quiet.wav", "", 0.0, 0.0, 0.0), 0);
        sound.decode(&resolver);
        assert_eq!(sound.excerpt().audio.channel(0)[0], 0.005);
        assert_eq!(sound.excerpt().length, 1.0);
    }

    #[test]
    fn test_root_note_sets_default_mapping() {
        let resolver = MemoryResolver::new();
        resolver.insert("c4.wav", vec![vec![0.0; 1000]], 1000.0, Some(60));

        let mut sound = Sound::from_entry(&SoundEntry::new("c4.wav", "", 0.0, 0.0, 0.0), 0);
        assert_eq!(sound.key_note(), DEFAULT_KEY_NOTE);
        sound.decode(&resolver);
        assert_eq!(sound.key_note(), 60);
        assert_eq!(sound.min_note(), 36);
        assert_eq!(sound.max_note(), 84);

        // An explicit key wins, and ranges are clamped and ordered.
        let mut entry = SoundEntry::new("c4.wav", "", 0.0, 0.0, 0.0);
        entry.key_note = Some(120);
        entry.min_note = Some(130);
        let mut sound = Sound::from_entry(&entry, 0);
        sound.decode(&resolver);
        assert_eq!(sound.key_note(), 120);
        assert_eq!(sound.min_note(), 127);
        assert_eq!(sound.max_note(), 127);
    }

    #[test]
    fn test_unresolved_source_is_silent() {
        let resolver = MemoryResolver::new();
        let mut sound = Sound::from_entry(&SoundEntry::new("9_9", "Missing", 0.0, 0.0, 0.0), 0);
        sound.decode(&resolver);
        assert!(!sound.is_resolved());
        assert!(!sound.is_playable());
        assert_eq!(sound.excerpt().length, 0.0);
    }

    #[test]
    fn test_adopt_shares_audio() {
        let resolver = MemoryResolver::new();
        resolver.insert("a.wav", vec![vec![0.0; 1000]], 1000.0, Some(50));
        let mut first = Sound::from_entry(&SoundEntry::new("a.wav", "", 0.0, 0.0, 0.0), 0);
        first.decode(&resolver);

        let mut second = Sound::from_entry(&SoundEntry::new("a.wav", "", 0.0, 0.0, 0.0), 0);
        assert_eq!(first.content_key(), second.content_key());
        second.adopt(&first);
        assert!(Arc::ptr_eq(first.audio(), second.audio()));
        assert_eq!(second.key_note(), 50);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "failed to read sound excerpt"))]
    fn test_read_failure_keeps_partial_audio() {
        let resolver = MemoryResolver::new();
        resolver.insert("bad.wav", vec![vec![0.001; 30000]], 1000.0, None);
        resolver.fail_reads_from("bad.wav", 10000);

        let mut sound = Sound::from_entry(&SoundEntry::new("bad.wav", "", 0.0, 0.0, 0.0), 0);
        sound.decode(&resolver);

        // Only reached in release builds.
        let audio = &sound.excerpt().audio;
        assert_eq!(audio.num_frames(), 30000 + TAIL_PADDING);
        assert_eq!(audio.channel(0)[8191], 0.001);
        assert_eq!(audio.channel(0)[20000], 0.0);
    }
}
