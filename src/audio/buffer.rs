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

/// A multi-channel audio buffer in planar format.
/// Each channel owns its own contiguous run of samples, and every channel has
/// the same number of frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    num_frames: usize,
}

impl AudioBuffer {
    /// Creates a zeroed buffer with the given dimensions.
    pub fn new(num_channels: usize, num_frames: usize) -> AudioBuffer {
        AudioBuffer {
            channels: vec![vec![0.0; num_frames]; num_channels],
            num_frames,
        }
    }

    /// Creates a buffer from planar channel data. Channels are truncated to the
    /// length of the shortest one.
    pub fn from_channels(mut channels: Vec<Vec<f32>>) -> AudioBuffer {
        let num_frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.truncate(num_frames);
        }
        AudioBuffer {
            channels,
            num_frames,
        }
    }

    /// Gets the number of channels.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Gets the number of frames (samples per channel).
    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Returns true if the buffer holds no audio.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() || self.num_frames == 0
    }

    /// Gets the samples for a channel.
    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.channels[channel]
    }

    /// Gets the samples for a channel mutably.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        &mut self.channels[channel]
    }

    /// Resizes the buffer. Contents are zeroed.
    pub fn set_size(&mut self, num_channels: usize, num_frames: usize) {
        self.channels = vec![vec![0.0; num_frames]; num_channels];
        self.num_frames = num_frames;
    }

    /// Zeroes the entire buffer.
    pub fn clear(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.fill(0.0);
        }
    }

    /// Zeroes a range of frames on every channel. The range is clipped to the buffer.
    pub fn clear_range(&mut self, start: usize, num: usize) {
        self.clear_channels_from(0, start, num);
    }

    /// Zeroes a range of frames on every channel from `first_channel` onwards.
    pub fn clear_channels_from(&mut self, first_channel: usize, start: usize, num: usize) {
        let start = start.min(self.num_frames);
        let end = start.saturating_add(num).min(self.num_frames);
        for channel in self.channels.iter_mut().skip(first_channel) {
            channel[start..end].fill(0.0);
        }
    }

    /// Copies `num` frames from a channel of another buffer into this one.
    /// The copy is clipped to whatever fits in both buffers.
    pub fn copy_from(
        &mut self,
        dest_channel: usize,
        dest_start: usize,
        source: &AudioBuffer,
        source_channel: usize,
        source_start: usize,
        num: usize,
    ) {
        let num = num
            .min(self.num_frames.saturating_sub(dest_start))
            .min(source.num_frames.saturating_sub(source_start));
        if num == 0 {
            return;
        }
        self.channels[dest_channel][dest_start..dest_start + num]
            .copy_from_slice(&source.channels[source_channel][source_start..source_start + num]);
    }

    /// Returns the largest absolute sample value in a range across all channels.
    pub fn magnitude(&self, start: usize, num: usize) -> f32 {
        let start = start.min(self.num_frames);
        let end = start.saturating_add(num).min(self.num_frames);
        self.channels
            .iter()
            .flat_map(|c| c[start..end].iter())
            .fold(0.0f32, |max, s| max.max(s.abs()))
    }

    /// Interleaves the first `num_channels` channels, e.g. for writing to a WAV file.
    pub fn to_interleaved(&self, num_channels: usize) -> Vec<f32> {
        let num_channels = num_channels.min(self.channels.len());
        let mut interleaved = Vec::with_capacity(self.num_frames * num_channels);
        for frame in 0..self.num_frames {
            for channel in self.channels.iter().take(num_channels) {
                interleaved.push(channel[frame]);
            }
        }
        interleaved
    }

    /// Appends the frames of another buffer with the same channel count.
    pub fn append(&mut self, other: &AudioBuffer, num: usize) {
        let num = num.min(other.num_frames);
        for (channel, source) in self.channels.iter_mut().zip(other.channels.iter()) {
            channel.extend_from_slice(&source[..num]);
        }
        self.num_frames += num;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_channels_truncates() {
        let buffer = AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0]]);
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.num_frames(), 2);
        assert_eq!(buffer.channel(0), &[1.0, 2.0]);
    }

    #[test]
    fn test_clear_channels_from() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 4], vec![1.0; 4], vec![1.0; 4]]);
        buffer.clear_channels_from(1, 1, 2);
        assert_eq!(buffer.channel(0), &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(buffer.channel(1), &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(buffer.channel(2), &[1.0, 0.0, 0.0, 1.0]);

        // Out of range clears are clipped rather than panicking.
        buffer.clear_range(3, 100);
        assert_eq!(buffer.channel(0), &[1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_copy_from_is_clipped() {
        let source = AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0]]);
        let mut dest = AudioBuffer::new(1, 4);
        dest.copy_from(0, 2, &source, 0, 1, 10);
        assert_eq!(dest.channel(0), &[0.0, 0.0, 2.0, 3.0]);
    }

    #[test]
    fn test_interleave_and_append() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0], vec![-1.0]]);
        let more = AudioBuffer::from_channels(vec![vec![2.0, 3.0], vec![-2.0, -3.0]]);
        buffer.append(&more, 1);
        assert_eq!(buffer.num_frames(), 2);
        assert_eq!(buffer.to_interleaved(2), vec![1.0, -1.0, 2.0, -2.0]);
        assert_eq!(buffer.magnitude(0, 2), 2.0);
    }
}
