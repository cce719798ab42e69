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
use std::sync::Arc;

use super::envelope::{Envelope, EnvelopeParameters};
use crate::audio::fade::{apply_crossfade_section, FadeCurve};
use crate::audio::{db_to_gain, midi_note_hz, AudioBuffer, Interpolator};

/// Voices render into at most this many output channels.
pub const MAX_OUTPUT_CHANNELS: usize = 2;

/// Frames of audio the fade tail scratch buffer can hold.
pub const SCRATCH_FRAMES: usize = 16384;

/// Longest fade tail rendered in one block.
const FADE_TAIL_MAX: usize = 100;

/// How much the fade tail gain drops per frame.
const FADE_TAIL_STEP: f32 = 0.01;

/// Envelope values are generated this many frames at a time.
const SHAPE_CHUNK: usize = 128;

/// Creates a scratch buffer suitable for [Voice::render].
pub fn scratch_buffer() -> AudioBuffer {
    AudioBuffer::new(MAX_OUTPUT_CHANNELS, SCRATCH_FRAMES)
}

/// The parameters a voice is started with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceStart {
    pub note: u8,
    pub key_note: i32,
    pub gain_db: f32,
    pub pan: f32,
    pub open_ended: bool,
    /// 0 to 1.
    pub velocity: f32,
    /// Frames into the block before the voice enters.
    pub delay: usize,
    /// Frames of the excerpt, not counting any silence padded after it.
    pub length: usize,
}

/// One sounding note.
pub struct Voice {
    note: u8,
    /// Read position in the audio. Negative while the voice is waiting to enter.
    offset: i64,
    audio: Arc<AudioBuffer>,
    gains: [f32; MAX_OUTPUT_CHANNELS],
    playback_ratio: f64,
    /// Output frames left before the fade tail.
    remaining: i64,
    interpolators: [Interpolator; MAX_OUTPUT_CHANNELS],
    envelope: Envelope,
    sample_rate: f64,
    start_fade: f32,
    open_ended: bool,
    release_triggered: bool,
    finished: bool,
}

impl Voice {
    /// Starts a voice playing `audio`, recorded at `source_rate`, for output at `sample_rate`.
    pub fn new(
        audio: Arc<AudioBuffer>,
        source_rate: f64,
        sample_rate: f64,
        envelope: EnvelopeParameters,
        start: VoiceStart,
    ) -> Voice {
        let playback_ratio = midi_note_hz(start.note as i32) / midi_note_hz(start.key_note)
            * source_rate
            / sample_rate;
        let remaining = 1 + (start.length.min(audio.num_frames()) as f64 / playback_ratio) as i64;

        let gain = db_to_gain(start.gain_db - 20.0 * (1.0 - start.velocity));
        let gains = [
            gain * (1.0 - start.pan).min(1.0),
            gain * (1.0 + start.pan).min(1.0),
        ];

        // The release is sized so the envelope reaches zero when the audio runs out.
        let mut envelope = Envelope::new(
            EnvelopeParameters {
                release: (remaining as f64 / sample_rate) as f32,
                ..envelope
            },
            sample_rate,
        );
        envelope.note_on();

        Voice {
            note: start.note,
            offset: -(start.delay as i64),
            audio,
            gains,
            playback_ratio,
            remaining,
            interpolators: [Interpolator::new(), Interpolator::new()],
            envelope,
            sample_rate,
            start_fade: 1.0,
            open_ended: start.open_ended,
            release_triggered: false,
            finished: false,
        }
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn is_open_ended(&self) -> bool {
        self.open_ended
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_release_triggered(&self) -> bool {
        self.release_triggered
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn playback_ratio(&self) -> f64 {
        self.playback_ratio
    }

    pub fn gains(&self) -> [f32; MAX_OUTPUT_CHANNELS] {
        self.gains
    }

    /// Shortens the voice so no more than `max` frames are left before its fade tail.
    pub fn limit_remaining(&mut self, max: i64) {
        self.remaining = self.remaining.min(max);
    }

    /// Starts the envelope's release, fitted to what's left to play. Only the first call has any effect.
    pub fn trigger_release(&mut self) {
        if self.release_triggered {
            return;
        }
        self.release_triggered = true;
        self.envelope
            .set_release((self.remaining.max(0) as f64 / self.sample_rate) as f32);
        self.envelope.note_off();
    }

    /// Adds `num` frames of this voice into `out`, starting at frame `start`.
    /// `scratch` must come from [scratch_buffer].
    pub fn render(
        &mut self,
        out: &mut AudioBuffer,
        start: usize,
        num: usize,
        scratch: &mut AudioBuffer,
    ) {
        if self.finished {
            return;
        }

        let input_channels = self.audio.num_channels();
        let output_channels = out.num_channels().min(MAX_OUTPUT_CHANNELS);
        if input_channels == 0 {
            self.finished = true;
            return;
        }

        let mut start = start;
        let mut num = num.min(out.num_frames().saturating_sub(start));

        if self.offset < 0 {
            let wait = (-self.offset).min(num as i64);
            self.offset += wait;
            start += wait as usize;
            num -= wait as usize;
        }
        if num == 0 {
            return;
        }

        let length = self.audio.num_frames();
        let to_play = (self.remaining.max(0) as usize).min(num);
        let mut shape = [0.0f32; SHAPE_CHUNK];
        let mut done = 0;
        while done < to_play {
            let chunk = (to_play - done).min(SHAPE_CHUNK);
            self.fill_shape(&mut shape[..chunk]);

            let position = (self.offset as usize).min(length);
            let mut consumed = 0;
            for channel in 0..output_channels {
                let input = &self.audio.channel(channel.min(input_channels - 1))[position..];
                let output = &mut out.channel_mut(channel)[start + done..start + done + chunk];
                consumed = self.interpolators[channel].process_adding_shaped(
                    self.playback_ratio,
                    input,
                    output,
                    self.gains[channel],
                    &shape[..chunk],
                );
            }

            self.offset = (self.offset + consumed as i64).min(length as i64);
            done += chunk;
        }
        self.remaining -= to_play as i64;
        start += to_play;
        num -= to_play;

        if num > 0 && self.start_fade > 0.0 {
            self.render_fade_tail(out, start, num, scratch, output_channels);
        }
    }

    /// Gains for the next frames: flat until the release, then the envelope.
    fn fill_shape(&mut self, shape: &mut [f32]) {
        if self.release_triggered {
            self.envelope.fill(shape);
        } else {
            shape.fill(1.0);
        }
    }

    /// Resynthesises a short, fading continuation of the audio so the voice never stops on a click.
    fn render_fade_tail(
        &mut self,
        out: &mut AudioBuffer,
        start: usize,
        num: usize,
        scratch: &mut AudioBuffer,
        output_channels: usize,
    ) {
        let (frames, end_fade) = if num > FADE_TAIL_MAX {
            (FADE_TAIL_MAX, 0.0)
        } else {
            (
                num,
                (self.start_fade - num as f32 * FADE_TAIL_STEP).max(0.0),
            )
        };

        let needed = (2 + ((frames + 2) as f64 * self.playback_ratio).round() as usize)
            .min(scratch.num_frames());
        let position = self.offset.max(0) as usize;
        let input_channels = self.audio.num_channels();
        let scratch_channels = scratch.num_channels().min(output_channels);

        if position + needed < self.audio.num_frames() {
            for channel in 0..scratch_channels {
                scratch.copy_from(
                    channel,
                    0,
                    &self.audio,
                    channel.min(input_channels - 1),
                    position,
                    needed,
                );
            }
        } else {
            scratch.clear_range(0, needed);
        }
        apply_crossfade_section(
            scratch,
            0,
            needed.saturating_sub(2),
            FadeCurve::Linear,
            self.start_fade,
            end_fade,
        );
        scratch.clear_range(needed.saturating_sub(2), 2);

        let mut shape = [0.0f32; SHAPE_CHUNK];
        self.fill_shape(&mut shape[..frames]);
        let mut consumed = 0;
        for channel in 0..scratch_channels {
            consumed = self.interpolators[channel].process_adding_shaped(
                self.playback_ratio,
                &scratch.channel(channel)[..needed],
                &mut out.channel_mut(channel)[start..start + frames],
                self.gains[channel],
                &shape[..frames],
            );
        }

        self.offset = (position + consumed).min(self.audio.num_frames()) as i64;
        self.start_fade = end_fade;
        if self.start_fade <= 0.0 {
            self.finished = true;
        }
    }
}

impl fmt::Debug for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voice")
            .field("note", &self.note)
            .field("offset", &self.offset)
            .field("playback_ratio", &self.playback_ratio)
            .field("remaining", &self.remaining)
            .field("open_ended", &self.open_ended)
            .field("release_triggered", &self.release_triggered)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::audio_test_utils::calculate_rms;

    fn constant_audio(channels: Vec<f32>, frames: usize) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::from_channels(
            channels.into_iter().map(|v| vec![v; frames]).collect(),
        ))
    }

    fn start(note: u8, length: usize) -> VoiceStart {
        VoiceStart {
            note,
            key_note: 72,
            gain_db: 0.0,
            pan: 0.0,
            open_ended: false,
            velocity: 1.0,
            delay: 0,
            length,
        }
    }

    #[test]
    fn test_playback_ratio_and_length() {
        let audio = constant_audio(vec![0.5], 1000);
        let voice = Voice::new(
            audio.clone(),
            48000.0,
            48000.0,
            EnvelopeParameters::default(),
            start(72, 1000),
        );
        assert!((voice.playback_ratio() - 1.0).abs() < 1e-9);
        assert_eq!(voice.remaining(), 1001);

        let voice = Voice::new(
            audio.clone(),
            48000.0,
            48000.0,
            EnvelopeParameters::default(),
            start(84, 1000),
        );
        assert!((voice.playback_ratio() - 2.0).abs() < 1e-9);
        assert_eq!(voice.remaining(), 501);

        // Source rate mismatches are folded into the ratio.
        let voice = Voice::new(
            audio,
            24000.0,
            48000.0,
            EnvelopeParameters::default(),
            start(72, 1000),
        );
        assert!((voice.playback_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_padding_is_not_played() {
        // 1000 frames of excerpt followed by 32 of silence.
        let audio = constant_audio(vec![0.5], 1032);
        let voice = Voice::new(
            audio,
            48000.0,
            48000.0,
            EnvelopeParameters::default(),
            start(72, 1000),
        );
        assert_eq!(voice.remaining(), 1001);
    }

    #[test]
    fn test_gains() {
        let audio = constant_audio(vec![0.5], 100);
        let mut voice_start = start(72, 100);
        voice_start.pan = -0.5;
        let voice = Voice::new(
            audio.clone(),
            44100.0,
            44100.0,
            EnvelopeParameters::default(),
            voice_start,
        );
        assert_eq!(voice.gains(), [1.0, 0.5]);

        // Half velocity drops the level by 10 dB.
        let mut voice_start = start(72, 100);
        voice_start.velocity = 0.5;
        voice_start.gain_db = 6.0;
        let voice = Voice::new(audio, 44100.0, 44100.0, EnvelopeParameters::default(), voice_start);
        let expected = db_to_gain(-4.0);
        assert!((voice.gains()[0] - expected).abs() < 1e-6);
        assert!((voice.gains()[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_delayed_entry() {
        let audio = constant_audio(vec![1.0], 1000);
        let mut voice_start = start(72, 1000);
        voice_start.delay = 40;
        let mut voice = Voice::new(
            audio,
            44100.0,
            44100.0,
            EnvelopeParameters::default(),
            voice_start,
        );
        assert_eq!(voice.offset(), -40);

        let mut out = AudioBuffer::new(2, 64);
        let mut scratch = scratch_buffer();
        voice.render(&mut out, 0, 64, &mut scratch);

        // Silent until the entry point, then the interpolator's two frames of latency.
        assert!(out.channel(0)[..42].iter().all(|s| *s == 0.0));
        assert!((out.channel(0)[42] - 1.0).abs() < 1e-6);
        assert!((out.channel(1)[63] - 1.0).abs() < 1e-6);
        assert_eq!(voice.remaining(), 1001 - 24);
    }

    #[test]
    fn test_delay_longer_than_block() {
        let audio = constant_audio(vec![1.0], 1000);
        let mut voice_start = start(72, 1000);
        voice_start.delay = 100;
        let mut voice = Voice::new(
            audio,
            44100.0,
            44100.0,
            EnvelopeParameters::default(),
            voice_start,
        );

        let mut out = AudioBuffer::new(2, 64);
        let mut scratch = scratch_buffer();
        voice.render(&mut out, 0, 64, &mut scratch);
        assert_eq!(out.magnitude(0, 64), 0.0);
        assert_eq!(voice.offset(), -36);
        assert_eq!(voice.remaining(), 1001);
    }

    #[test]
    fn test_plays_to_completion_then_fades() {
        let audio = constant_audio(vec![0.5, -0.5], 232);
        let mut voice = Voice::new(
            audio,
            44100.0,
            44100.0,
            EnvelopeParameters::default(),
            start(72, 232),
        );
        let mut out = AudioBuffer::new(2, 64);
        let mut scratch = scratch_buffer();

        let mut last_remaining = voice.remaining();
        let mut blocks = 0;
        while !voice.is_finished() && blocks < 100 {
            out.clear();
            voice.render(&mut out, 0, 64, &mut scratch);
            assert!(voice.remaining() <= last_remaining);
            assert!(voice.offset() <= 232);
            last_remaining = voice.remaining();
            blocks += 1;
        }

        assert!(voice.is_finished());
        assert_eq!(voice.remaining(), 0);
        assert_eq!(blocks, 6);
    }

    #[test]
    fn test_mono_audio_feeds_both_channels() {
        let audio = constant_audio(vec![0.5], 1000);
        let mut voice = Voice::new(
            audio,
            44100.0,
            44100.0,
            EnvelopeParameters::default(),
            start(72, 1000),
        );
        let mut out = AudioBuffer::new(4, 128);
        let mut scratch = scratch_buffer();
        voice.render(&mut out, 0, 128, &mut scratch);

        assert!((out.channel(0)[100] - 0.5).abs() < 1e-6);
        assert!((out.channel(1)[100] - 0.5).abs() < 1e-6);
        // Only the first two outputs are touched.
        assert!(out.channel(2).iter().all(|s| *s == 0.0));
        assert!(out.channel(3).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_release_fades_out() {
        let audio = constant_audio(vec![1.0], 48000);
        let mut voice = Voice::new(
            audio,
            48000.0,
            48000.0,
            EnvelopeParameters::default(),
            start(72, 48000),
        );
        let mut scratch = scratch_buffer();
        let mut out = AudioBuffer::new(2, 512);
        voice.render(&mut out, 0, 512, &mut scratch);

        voice.limit_remaining(4800);
        voice.trigger_release();
        voice.trigger_release();
        assert!(voice.is_release_triggered());
        assert_eq!(voice.remaining(), 4800);

        let mut levels = Vec::new();
        while !voice.is_finished() {
            out.clear();
            voice.render(&mut out, 0, 512, &mut scratch);
            levels.push(calculate_rms(out.channel(0)));
        }

        // The level falls steadily to silence rather than cutting off.
        assert!(levels.len() >= 9);
        assert!(levels[0] > 0.8);
        assert!(levels.windows(2).all(|w| w[1] <= w[0] + 1e-6));
        assert!(levels[levels.len() - 1] < 0.05);
    }

    #[test]
    fn test_finished_voice_renders_nothing() {
        let audio = constant_audio(vec![1.0], 10);
        let mut voice = Voice::new(
            audio,
            44100.0,
            44100.0,
            EnvelopeParameters::default(),
            start(72, 10),
        );
        let mut scratch = scratch_buffer();
        let mut out = AudioBuffer::new(2, 512);
        voice.render(&mut out, 0, 512, &mut scratch);
        assert!(voice.is_finished());

        out.clear();
        voice.render(&mut out, 0, 512, &mut scratch);
        assert_eq!(out.magnitude(0, 512), 0.0);
    }

    #[test]
    fn test_fade_tail_continues_across_blocks() {
        let audio = constant_audio(vec![0.5], 1000);
        let mut voice = Voice::new(
            audio,
            48000.0,
            48000.0,
            EnvelopeParameters::default(),
            start(72, 1000),
        );
        let mut scratch = scratch_buffer();
        let mut out = AudioBuffer::new(2, 64);
        voice.render(&mut out, 0, 64, &mut scratch);
        assert_eq!(voice.offset(), 64);

        // 10 frames of audio, then 54 of tail that carry on reading the source.
        voice.limit_remaining(10);
        voice.render(&mut out, 0, 64, &mut scratch);
        assert!(!voice.is_finished());
        assert_eq!(voice.offset(), 128);

        // The rest of the tail picks up where the last block left off.
        out.clear();
        voice.render(&mut out, 0, 64, &mut scratch);
        assert!(voice.is_finished());
        assert_eq!(voice.offset(), 192);
        assert!(out.channel(0)[0] > 0.1);
    }

    #[test]
    fn test_envelope_waits_for_release() {
        let audio = constant_audio(vec![1.0], 48000);
        let envelope = EnvelopeParameters {
            attack: 0.0,
            decay: 0.1,
            sustain: 0.5,
            release: 0.0,
        };
        let mut voice = Voice::new(audio, 48000.0, 48000.0, envelope, start(72, 48000));
        let mut scratch = scratch_buffer();
        let mut out = AudioBuffer::new(2, 512);

        // The decay would have reached the sustain level by now if it were running.
        for _ in 0..20 {
            out.clear();
            voice.render(&mut out, 0, 512, &mut scratch);
        }
        assert!((out.channel(0)[511] - 1.0).abs() < 1e-6);

        // The release ramps down from full level over what's left to play.
        voice.limit_remaining(4800);
        voice.trigger_release();
        out.clear();
        voice.render(&mut out, 0, 512, &mut scratch);
        assert!(out.channel(0)[0] < 1.0);
        assert!(out.channel(0)[0] > 0.99);
        assert!((out.channel(0)[511] - (1.0 - 512.0 / 4800.0)).abs() < 1e-3);
    }
}
