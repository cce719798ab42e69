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

/// Number of input samples the interpolator looks at for each output sample.
const NUM_POINTS: usize = 4;

/// A streaming, single channel resampler using 4-point cubic Lagrange interpolation.
///
/// The interpolator keeps the last four input samples and a fractional read
/// position between calls, so a stream can be resampled block by block with an
/// arbitrary (and changing) ratio. A ratio above 1 reads the input faster than
/// the output is produced, raising the pitch.
///
/// Output lags the input by two samples: the value produced at fractional
/// position `t` lies between the second and third newest samples in history.
#[derive(Clone, Debug)]
pub struct Interpolator {
    /// Input history, oldest first.
    history: [f32; NUM_POINTS],
    sub_sample_pos: f64,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpolator {
    pub fn new() -> Interpolator {
        Interpolator {
            history: [0.0; NUM_POINTS],
            sub_sample_pos: 1.0,
        }
    }

    /// Clears the input history and the fractional position.
    pub fn reset(&mut self) {
        self.history = [0.0; NUM_POINTS];
        self.sub_sample_pos = 1.0;
    }

    /// Resamples `input` into `output`, overwriting it.
    /// Returns the number of input samples consumed.
    pub fn process(&mut self, ratio: f64, input: &[f32], output: &mut [f32]) -> usize {
        self.run(ratio, input, output.len(), |i, value| output[i] = value)
    }

    /// Resamples `input` and adds the result, scaled by `gain`, into `output`.
    /// Returns the number of input samples consumed.
    pub fn process_adding(
        &mut self,
        ratio: f64,
        input: &[f32],
        output: &mut [f32],
        gain: f32,
    ) -> usize {
        self.run(ratio, input, output.len(), |i, value| {
            output[i] += value * gain
        })
    }

    /// Like [Interpolator::process_adding], but each output sample is further
    /// scaled by the matching entry in `shape`. `shape` must be at least as long
    /// as `output`.
    pub fn process_adding_shaped(
        &mut self,
        ratio: f64,
        input: &[f32],
        output: &mut [f32],
        gain: f32,
        shape: &[f32],
    ) -> usize {
        let num = output.len().min(shape.len());
        self.run(ratio, input, num, |i, value| {
            output[i] += value * gain * shape[i]
        })
    }

    /// Produces `num_out` samples, handing each one to `write`. Input past the end
    /// of `input` reads as silence.
    fn run<F>(&mut self, ratio: f64, input: &[f32], num_out: usize, mut write: F) -> usize
    where
        F: FnMut(usize, f32),
    {
        let mut used = 0;
        let mut pos = self.sub_sample_pos;

        for i in 0..num_out {
            while pos >= 1.0 {
                self.push(input.get(used).copied().unwrap_or(0.0));
                used += 1;
                pos -= 1.0;
            }

            write(i, self.value_at(pos as f32));
            pos += ratio;
        }

        self.sub_sample_pos = pos;
        used
    }

    #[inline]
    fn push(&mut self, sample: f32) {
        self.history.copy_within(1.., 0);
        self.history[NUM_POINTS - 1] = sample;
    }

    /// Lagrange polynomial through the history at nodes -1, 0, 1 and 2, evaluated at `t`.
    #[inline]
    fn value_at(&self, t: f32) -> f32 {
        let [y0, y1, y2, y3] = self.history;
        let tp1 = t + 1.0;
        let tm1 = t - 1.0;
        let tm2 = t - 2.0;

        y0 * (-t * tm1 * tm2 / 6.0)
            + y1 * (tp1 * tm1 * tm2 / 2.0)
            + y2 * (-tp1 * t * tm2 / 2.0)
            + y3 * (tp1 * t * tm1 / 6.0)
    }
}
