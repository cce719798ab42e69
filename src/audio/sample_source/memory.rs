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
#![cfg(test)]

use std::time::Duration;

use super::error::SampleSourceError;
use super::traits::SampleSource;

/// An in-memory sample source, optionally failing after a number of frames.
pub struct MemorySampleSource {
    planar_samples: Vec<Vec<f32>>,
    current_frame: usize,
    sample_rate: u32,
    fail_at: Option<usize>,
}

impl MemorySampleSource {
    pub fn new(planar_samples: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            planar_samples,
            current_frame: 0,
            sample_rate,
            fail_at: None,
        }
    }

    /// Makes reads at or after the given frame fail.
    pub fn failing_at(mut self, frame: usize) -> Self {
        self.fail_at = Some(frame);
        self
    }

    fn total_frames(&self) -> usize {
        self.planar_samples.first().map(|c| c.len()).unwrap_or(0)
    }
}

impl SampleSource for MemorySampleSource {
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError> {
        if output.len() != self.planar_samples.len() {
            return Err(SampleSourceError::SampleConversionFailed(format!(
                "Output has {} channels, expected {}",
                output.len(),
                self.planar_samples.len()
            )));
        }
        if let Some(fail_at) = self.fail_at {
            if self.current_frame >= fail_at {
                return Err(SampleSourceError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "simulated read failure",
                )));
            }
        }

        for ch in output.iter_mut() {
            ch.clear();
        }

        let mut to_copy = self
            .total_frames()
            .saturating_sub(self.current_frame)
            .min(max_frames);
        if let Some(fail_at) = self.fail_at {
            to_copy = to_copy.min(fail_at - self.current_frame);
        }

        for (out_ch, source) in output.iter_mut().zip(self.planar_samples.iter()) {
            out_ch.extend_from_slice(&source[self.current_frame..self.current_frame + to_copy]);
        }
        self.current_frame += to_copy;

        Ok(to_copy)
    }

    fn channel_count(&self) -> u16 {
        self.planar_samples.len() as u16
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(
            self.total_frames() as f64 / self.sample_rate as f64,
        ))
    }
}
