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
use std::time::Duration;

use super::error::SampleSourceError;

/// A decoded stream of planar samples.
pub trait SampleSource: Send {
    /// Reads up to `max_frames` frames into `output`, one Vec per channel.
    /// Each channel Vec is cleared first and all channels receive the same number
    /// of frames. Returns the number of frames written, 0 at the end of the stream.
    ///
    /// `output` must have exactly channel_count() elements.
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError>;

    /// Get the number of channels in this source
    fn channel_count(&self) -> u16;

    /// Get the sample rate of this source
    fn sample_rate(&self) -> u32;

    /// Get the duration of this source, if the container reports it.
    fn duration(&self) -> Option<Duration>;
}

impl SampleSource for Box<dyn SampleSource> {
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError> {
        (**self).next_chunk(output, max_frames)
    }

    fn channel_count(&self) -> u16 {
        (**self).channel_count()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }
}
