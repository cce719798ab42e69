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
use std::f32::consts::PI;

use super::buffer::AudioBuffer;

/// The shape of a gain ramp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FadeCurve {
    Linear,
    /// Rises quickly, then flattens out.
    Convex,
    /// Rises slowly, then steepens.
    Concave,
    SCurve,
}

impl FadeCurve {
    /// Maps a position along the fade (0 to 1) to a gain (0 to 1).
    pub fn gain(&self, alpha: f32) -> f32 {
        let alpha = alpha.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => alpha,
            FadeCurve::Convex => (alpha * PI / 2.0).sin(),
            FadeCurve::Concave => 1.0 - (alpha * PI / 2.0).cos(),
            FadeCurve::SCurve => (1.0 - (alpha * PI).cos()) / 2.0,
        }
    }
}

/// Multiplies `num` frames of every channel, starting at `start`, by a ramp that
/// moves from `start_alpha` to `end_alpha` along the given curve.
/// Frames that fall outside the buffer are ignored.
pub fn apply_crossfade_section(
    buffer: &mut AudioBuffer,
    start: usize,
    num: usize,
    curve: FadeCurve,
    start_alpha: f32,
    end_alpha: f32,
) {
    if num == 0 {
        return;
    }

    let end = start.saturating_add(num).min(buffer.num_frames());
    let delta = (end_alpha - start_alpha) / num as f32;
    for channel in 0..buffer.num_channels() {
        let samples = buffer.channel_mut(channel);
        let mut alpha = start_alpha;
        for sample in samples.iter_mut().take(end).skip(start) {
            *sample *= curve.gain(alpha);
            alpha += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_endpoints() {
        for curve in [
            FadeCurve::Linear,
            FadeCurve::Convex,
            FadeCurve::Concave,
            FadeCurve::SCurve,
        ] {
            assert!(curve.gain(0.0).abs() < 1e-6, "{:?} should start at 0", curve);
            assert!((curve.gain(1.0) - 1.0).abs() < 1e-6, "{:?} should end at 1", curve);
        }

        // Concave stays below linear, convex stays above it.
        assert!(FadeCurve::Concave.gain(0.5) < 0.5);
        assert!(FadeCurve::Convex.gain(0.5) > 0.5);
        assert!((FadeCurve::SCurve.gain(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_fade_in_section() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 6], vec![-1.0; 6]]);
        apply_crossfade_section(&mut buffer, 0, 4, FadeCurve::Linear, 0.0, 1.0);
        assert_eq!(buffer.channel(0), &[0.0, 0.25, 0.5, 0.75, 1.0, 1.0]);
        assert_eq!(buffer.channel(1), &[-0.0, -0.25, -0.5, -0.75, -1.0, -1.0]);
    }

    #[test]
    fn test_fade_out_section_is_clipped() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 4]]);
        apply_crossfade_section(&mut buffer, 2, 4, FadeCurve::Linear, 1.0, 0.0);
        assert_eq!(buffer.channel(0), &[1.0, 1.0, 1.0, 0.75]);
    }
}
