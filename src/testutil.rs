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
use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;

use crate::audio::AudioBuffer;
use crate::media::{AudioReader, DecodedMedia, MediaError, MediaResolver, MemoryReader, SourceRef};

/// Writes planar samples to a 32-bit WAV file.
pub fn write_wav<S: hound::Sample + Copy + 'static>(
    path: PathBuf,
    samples: Vec<Vec<S>>,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let tempwav = File::create(path)?;

    // Determine sample format based on the type
    let sample_format = if std::any::TypeId::of::<S>() == std::any::TypeId::of::<f32>() {
        SampleFormat::Float
    } else if std::any::TypeId::of::<S>() == std::any::TypeId::of::<i32>() {
        SampleFormat::Int
    } else {
        return Err("Unsupported sample format".into());
    };

    let num_channels = samples.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let mut writer = WavWriter::new(
        tempwav,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format,
        },
    )?;

    let num_frames = samples.iter().map(|c| c.len()).min().unwrap_or(0);
    for frame in 0..num_frames {
        for channel in &samples {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;

    Ok(())
}

pub mod audio_test_utils {
    use std::f32::consts::PI;

    /// Calculate RMS (Root Mean Square) of a signal
    pub fn calculate_rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
        (sum_squares / samples.len() as f32).sqrt()
    }

    /// Generate a sine wave.
    pub fn sine(frequency: f32, amplitude: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }
}

#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let mut tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(100);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            panic!("System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

struct MemoryMedia {
    media: Arc<DecodedMedia>,
    fail_from: Option<u64>,
}

/// A [MediaResolver] over in-memory media that counts what it's asked to do.
#[derive(Default)]
pub struct MemoryResolver {
    media: Mutex<HashMap<String, MemoryMedia>>,
    resolves: AtomicUsize,
    reads: Arc<AtomicUsize>,
}

impl MemoryResolver {
    pub fn new() -> MemoryResolver {
        MemoryResolver::default()
    }

    /// Adds media under a source name, e.g. `kick.wav` or `1_2`.
    pub fn insert(&self, source: &str, channels: Vec<Vec<f32>>, sample_rate: f64, root_note: Option<u8>) {
        self.media.lock().insert(
            source.to_string(),
            MemoryMedia {
                media: Arc::new(DecodedMedia {
                    audio: AudioBuffer::from_channels(channels),
                    sample_rate,
                    root_note,
                }),
                fail_from: None,
            },
        );
    }

    /// Makes reads of the given source fail once they reach `frame`.
    pub fn fail_reads_from(&self, source: &str, frame: u64) {
        if let Some(media) = self.media.lock().get_mut(source) {
            media.fail_from = Some(frame);
        }
    }

    pub fn remove(&self, source: &str) {
        self.media.lock().remove(source);
    }

    /// Number of resolve calls so far.
    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    /// Number of reads from resolved media so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl MediaResolver for MemoryResolver {
    fn resolve(&self, source: &SourceRef) -> Option<Box<dyn AudioReader>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let media = self.media.lock();
        let entry = media.get(&source.to_string())?;
        Some(Box::new(CountingReader {
            inner: MemoryReader::new(entry.media.clone()),
            fail_from: entry.fail_from,
            reads: self.reads.clone(),
        }))
    }
}

struct CountingReader {
    inner: MemoryReader,
    fail_from: Option<u64>,
    reads: Arc<AtomicUsize>,
}

impl AudioReader for CountingReader {
    fn sample_rate(&self) -> f64 {
        self.inner.sample_rate()
    }

    fn num_channels(&self) -> usize {
        self.inner.num_channels()
    }

    fn length_in_frames(&self) -> u64 {
        self.inner.length_in_frames()
    }

    fn root_note(&self) -> Option<u8> {
        self.inner.root_note()
    }

    fn read(
        &mut self,
        start: u64,
        dest: &mut AudioBuffer,
        dest_start: usize,
        num: usize,
    ) -> Result<(), MediaError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(fail_from) = self.fail_from {
            if start + num as u64 > fail_from {
                return Err(MediaError::OutOfRange {
                    start,
                    num,
                    length: fail_from,
                });
            }
        }
        self.inner.read(start, dest, dest_start, num)
    }
}
