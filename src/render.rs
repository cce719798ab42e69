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

//! Offline rendering of Standard MIDI Files through a sampler.

use std::fs;
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use midly::num::u4;
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::{debug, info};

use crate::audio::AudioBuffer;
use crate::sampler::{MidiBuffer, Sampler};

/// The tempo of a file with no tempo events: 120 beats per minute.
const DEFAULT_TEMPO_MICROS: f64 = 500_000.0;

/// Rendered files are stereo.
const OUTPUT_CHANNELS: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Unable to read MIDI file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid MIDI file: {0}")]
    Midi(#[from] midly::Error),

    #[error("Unable to write WAV file: {0}")]
    Wav(#[from] hound::Error),
}

/// A MIDI message at an absolute frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedEvent {
    pub frame: u64,
    pub channel: u4,
    pub message: MidiMessage,
}

/// What a render produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSummary {
    pub events: usize,
    pub frames: u64,
    pub peak: f32,
}

/// Every channel message in the file, in time order, positioned at frames of `sample_rate`.
/// Tempo changes are followed for files timed in beats.
pub fn midi_events(smf: &Smf, sample_rate: f64) -> Vec<TimedEvent> {
    let mut ticks = Vec::new();
    let mut track_start = 0u64;
    for track in smf.tracks.iter() {
        let mut tick = track_start;
        for event in track.iter() {
            tick += event.delta.as_int() as u64;
            ticks.push((tick, event.kind));
        }
        if matches!(smf.header.format, Format::Sequential) {
            track_start = tick;
        }
    }
    // Stable, so events at the same tick keep their file order.
    ticks.sort_by_key(|(tick, _)| *tick);

    let mut events = Vec::new();
    let mut tempo = DEFAULT_TEMPO_MICROS;
    let mut last_tick = 0u64;
    let mut seconds = 0.0f64;
    for (tick, kind) in ticks {
        let delta = (tick - last_tick) as f64;
        seconds += match smf.header.timing {
            Timing::Metrical(ticks_per_beat) => {
                delta * tempo / (ticks_per_beat.as_int().max(1) as f64 * 1_000_000.0)
            }
            Timing::Timecode(fps, subframes) => {
                delta / (fps.as_f32() as f64 * subframes.max(1) as f64)
            }
        };
        last_tick = tick;

        match kind {
            TrackEventKind::Meta(MetaMessage::Tempo(micros)) => {
                tempo = micros.as_int() as f64;
            }
            TrackEventKind::Midi { channel, message } => events.push(TimedEvent {
                frame: (seconds * sample_rate).round() as u64,
                channel,
                message,
            }),
            _ => {}
        }
    }
    events
}

/// Plays events through the sampler in blocks of `block_size` frames, rendering
/// `tail_frames` past the last event. The sampler's sample rate is used as is.
pub fn render_events(
    sampler: &Sampler,
    events: &[TimedEvent],
    block_size: usize,
    tail_frames: u64,
) -> AudioBuffer {
    let block_size = block_size.max(1);
    let end = events.last().map(|e| e.frame).unwrap_or(0) + tail_frames;

    let mut output = AudioBuffer::new(OUTPUT_CHANNELS, 0);
    let mut block = AudioBuffer::new(OUTPUT_CHANNELS, block_size);
    let mut midi = MidiBuffer::with_capacity(events.len().min(1024));
    let mut next_event = 0;
    let mut block_start = 0u64;

    while block_start < end {
        let num = (end - block_start).min(block_size as u64) as usize;
        let block_end = block_start + num as u64;

        midi.clear();
        while let Some(event) = events.get(next_event) {
            if event.frame >= block_end {
                break;
            }
            let offset = event.frame.saturating_sub(block_start) as usize;
            midi.add(offset, event.channel, event.message);
            next_event += 1;
        }

        block.clear();
        sampler.process(&mut block, 0, num, Some(&midi));
        output.append(&block, num);
        block_start = block_end;
    }

    debug!(
        events = events.len(),
        frames = output.num_frames(),
        "Rendered events"
    );
    output
}

/// Writes a buffer to a 32-bit float WAV file.
pub fn write_wav(path: &Path, buffer: &AudioBuffer, sample_rate: u32) -> Result<(), RenderError> {
    let channels = buffer.num_channels().clamp(1, OUTPUT_CHANNELS);
    let mut writer = WavWriter::create(
        path,
        WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;
    for sample in buffer.to_interleaved(channels) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Renders a MIDI file through the sampler into a WAV file.
pub fn render_file(
    sampler: &Sampler,
    midi_path: &Path,
    output_path: &Path,
    block_size: usize,
    tail: Duration,
) -> Result<RenderSummary, RenderError> {
    let data = fs::read(midi_path)?;
    let smf = Smf::parse(&data)?;
    let sample_rate = sampler.sample_rate();
    let events = midi_events(&smf, sample_rate);

    info!(
        midi = %midi_path.display(),
        tracks = smf.tracks.len(),
        events = events.len(),
        "Rendering MIDI file"
    );

    let tail_frames = (tail.as_secs_f64() * sample_rate).round() as u64;
    let output = render_events(sampler, &events, block_size, tail_frames);
    write_wav(output_path, &output, sample_rate.round() as u32)?;

    let summary = RenderSummary {
        events: events.len(),
        frames: output.num_frames() as u64,
        peak: output.magnitude(0, output.num_frames()),
    };
    info!(
        output = %output_path.display(),
        frames = summary.frames,
        peak = summary.peak,
        "Render complete"
    );
    Ok(summary)
}
