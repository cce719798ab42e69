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
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use symphonia::default::{get_codecs, get_probe};

use super::error::SampleSourceError;
use super::traits::SampleSource;

/// A sample source that decodes audio files (WAV, AIFF, FLAC, MP3, Ogg, etc.)
/// with symphonia and hands out planar f32 samples.
pub struct AudioSampleSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    is_finished: bool,
    // Decoded frames from the last packet that haven't been handed out yet.
    pending: Vec<Vec<f32>>,
    pending_position: usize,
    channels: u16,
    sample_rate: u32,
    duration: Option<Duration>,
}

impl SampleSource for AudioSampleSource {
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError> {
        if output.len() != self.channels as usize {
            return Err(SampleSourceError::SampleConversionFailed(format!(
                "Output has {} channels, expected {}",
                output.len(),
                self.channels
            )));
        }

        for ch in output.iter_mut() {
            ch.clear();
        }

        let mut written = 0;
        while written < max_frames {
            let available = self.pending_frames() - self.pending_position;
            if available == 0 {
                if self.is_finished || !self.refill_pending()? {
                    self.is_finished = true;
                    break;
                }
                continue;
            }

            let to_take = available.min(max_frames - written);
            let range = self.pending_position..self.pending_position + to_take;
            for (out_ch, pending_ch) in output.iter_mut().zip(self.pending.iter()) {
                out_ch.extend_from_slice(&pending_ch[range.clone()]);
            }
            self.pending_position += to_take;
            written += to_take;
        }

        Ok(written)
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

impl AudioSampleSource {
    /// Opens an audio file and prepares its first audio track for decoding.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SampleSourceError> {
        // Include the path in the error so the user sees which file failed.
        let path_ref = path.as_ref();
        let file = File::open(path_ref).map_err(|e| {
            SampleSourceError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path_ref.display(), e),
            ))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path_ref.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let file_path = path_ref.to_string_lossy().to_string();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| {
                SampleSourceError::SampleConversionFailed(format!("'{}': {}", file_path, e))
            })?;

        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                SampleSourceError::SampleConversionFailed("No audio track found".to_string())
            })?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params.sample_rate.ok_or_else(|| {
            SampleSourceError::SampleConversionFailed("Sample rate not specified".to_string())
        })?;
        let duration = params
            .n_frames
            .map(|n_frames| Duration::from_secs_f64(n_frames as f64 / sample_rate as f64));

        let mut decoder = get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| {
                SampleSourceError::SampleConversionFailed(format!("'{}': {}", file_path, e))
            })?;

        // Prefer the container's channel count. If it's missing, decode the first
        // packet to find out and keep its samples as the start of the stream.
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
        let (channels, pending) = if channels > 0 {
            (channels, vec![Vec::new(); channels as usize])
        } else {
            let mut pending = Vec::new();
            let decoded = Self::read_and_decode_next_packet_for_track(
                format_reader.as_mut(),
                decoder.as_mut(),
                track_id,
                &mut pending,
            )?;
            if !decoded {
                return Err(SampleSourceError::SampleConversionFailed(
                    "Channels not specified".to_string(),
                ));
            }
            (pending.len() as u16, pending)
        };

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            is_finished: false,
            pending,
            pending_position: 0,
            channels,
            sample_rate,
            duration,
        })
    }

    fn pending_frames(&self) -> usize {
        self.pending.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Decodes the next packet into the pending buffer. Returns false at the end of the stream.
    fn refill_pending(&mut self) -> Result<bool, SampleSourceError> {
        let decoded = Self::read_and_decode_next_packet_for_track(
            self.format_reader.as_mut(),
            self.decoder.as_mut(),
            self.track_id,
            &mut self.pending,
        )?;
        self.pending_position = 0;

        if !decoded {
            for ch in self.pending.iter_mut() {
                ch.clear();
            }
            return Ok(false);
        }

        // Keep the planes in step with the reported channel count.
        let channels = self.channels as usize;
        if self.pending.len() != channels {
            let frames = self.pending_frames();
            self.pending.resize(channels, vec![0.0; frames]);
        }
        Ok(true)
    }

    /// Reads the next packet with common error handling.
    /// - `Ok(Some(packet))` if a packet was read
    /// - `Ok(None)` at the end of the file (UnexpectedEof or DecodeError)
    /// - `Err(...)` otherwise, including ResetRequired so the caller can reset the decoder
    fn read_next_packet(
        format_reader: &mut dyn FormatReader,
    ) -> Result<Option<Packet>, SampleSourceError> {
        match format_reader.next_packet() {
            Ok(packet) => Ok(Some(packet)),
            Err(SymphoniaError::ResetRequired) => {
                Err(SampleSourceError::AudioError(SymphoniaError::ResetRequired))
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            // Some demuxers report DecodeError at EOF instead of IoError.
            Err(SymphoniaError::DecodeError(_)) => Ok(None),
            Err(e) => Err(SampleSourceError::AudioError(e)),
        }
    }

    /// Reads and decodes packets for the given track until one yields samples,
    /// writing them planar into `dest`. Returns false at the end of the stream.
    fn read_and_decode_next_packet_for_track(
        format_reader: &mut dyn FormatReader,
        decoder: &mut dyn Decoder,
        track_id: u32,
        dest: &mut Vec<Vec<f32>>,
    ) -> Result<bool, SampleSourceError> {
        loop {
            let packet = match Self::read_next_packet(format_reader) {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(false),
                Err(SampleSourceError::AudioError(SymphoniaError::ResetRequired)) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(e),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    decoder.decode(&packet)?
                }
                Err(e) => return Err(SampleSourceError::AudioError(e)),
            };

            // Header packets (e.g. Vorbis) decode to zero frames; keep reading.
            if Self::decode_buffer_to_planar(decoded, dest) > 0 {
                return Ok(true);
            }
        }
    }

    /// Converts a decoded buffer to planar f32 samples in `dest`, returning the frame count.
    fn decode_buffer_to_planar(decoded: AudioBufferRef, dest: &mut Vec<Vec<f32>>) -> usize {
        match decoded {
            AudioBufferRef::F32(buf) => Self::copy_planes(&buf, dest, |sample| sample),
            AudioBufferRef::F64(buf) => Self::copy_planes(&buf, dest, |sample| sample as f32),
            AudioBufferRef::S8(buf) => Self::copy_planes(&buf, dest, Self::scale_s8),
            AudioBufferRef::S16(buf) => Self::copy_planes(&buf, dest, Self::scale_s16),
            AudioBufferRef::S24(buf) => {
                Self::copy_planes(&buf, dest, |sample| Self::scale_s24(sample.inner()))
            }
            AudioBufferRef::S32(buf) => Self::copy_planes(&buf, dest, Self::scale_s32),
            AudioBufferRef::U8(buf) => Self::copy_planes(&buf, dest, Self::scale_u8),
            AudioBufferRef::U16(buf) => Self::copy_planes(&buf, dest, Self::scale_u16),
            AudioBufferRef::U24(buf) => {
                Self::copy_planes(&buf, dest, |sample| Self::scale_u24(sample.inner()))
            }
            AudioBufferRef::U32(buf) => Self::copy_planes(&buf, dest, Self::scale_u32),
        }
    }

    /// Copies every plane of a generic symphonia buffer into `dest`, converting each sample.
    fn copy_planes<T, F>(buf: &AudioBuffer<T>, dest: &mut Vec<Vec<f32>>, convert: F) -> usize
    where
        T: Sample,
        F: Fn(T) -> f32,
    {
        let frames = buf.frames();
        let channels = buf.spec().channels.count();
        dest.resize(channels, Vec::new());
        for (ch_idx, plane) in buf.planes().planes().iter().enumerate().take(channels) {
            let out = &mut dest[ch_idx];
            out.clear();
            out.extend(plane[..frames].iter().map(|s| convert(*s)));
        }
        frames
    }

    // Scaling helpers for all integer formats.

    #[inline]
    pub(crate) fn scale_s8(sample: i8) -> f32 {
        sample as f32 / (1i64 << 7) as f32
    }

    #[inline]
    pub(crate) fn scale_s16(sample: i16) -> f32 {
        sample as f32 / (1i64 << 15) as f32
    }

    #[inline]
    pub(crate) fn scale_s24(sample: i32) -> f32 {
        sample as f32 / (1i64 << 23) as f32
    }

    #[inline]
    pub(crate) fn scale_s32(sample: i32) -> f32 {
        sample as f32 / (1i64 << 31) as f32
    }

    #[inline]
    pub(crate) fn scale_u8(sample: u8) -> f32 {
        (sample as f32 / u8::MAX as f32) * 2.0 - 1.0
    }

    #[inline]
    pub(crate) fn scale_u16(sample: u16) -> f32 {
        (sample as f32 / u16::MAX as f32) * 2.0 - 1.0
    }

    #[inline]
    pub(crate) fn scale_u24(sample: u32) -> f32 {
        let max = (1u32 << 24) - 1;
        (sample as f32 / max as f32) * 2.0 - 1.0
    }

    #[inline]
    pub(crate) fn scale_u32(sample: u32) -> f32 {
        (sample as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_wav;

    #[test]
    fn test_scaling_helpers() {
        assert_eq!(AudioSampleSource::scale_s16(0), 0.0);
        assert_eq!(AudioSampleSource::scale_s16(i16::MIN), -1.0);
        assert!((AudioSampleSource::scale_s16(i16::MAX) - 1.0).abs() < 1e-4);
        assert_eq!(AudioSampleSource::scale_s8(-128), -1.0);
        assert_eq!(AudioSampleSource::scale_s24(-(1 << 23)), -1.0);
        assert_eq!(AudioSampleSource::scale_u8(0), -1.0);
        assert_eq!(AudioSampleSource::scale_u8(u8::MAX), 1.0);
        assert_eq!(AudioSampleSource::scale_u16(u16::MAX), 1.0);
    }

    #[test]
    fn test_read_wav_planar() -> Result<(), Box<dyn std::error::Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("stereo.wav");
        let left: Vec<i32> = (0..1000).map(|i| i * 10).collect();
        let right: Vec<i32> = (0..1000).map(|i| -i * 10).collect();
        write_wav(path.clone(), vec![left, right], 44100)?;

        let mut source = AudioSampleSource::from_file(&path)?;
        assert_eq!(source.channel_count(), 2);
        assert_eq!(source.sample_rate(), 44100);

        let mut output = vec![Vec::new(); 2];
        let mut total = 0;
        let mut first_chunk = true;
        loop {
            let frames = source.next_chunk(&mut output, 300)?;
            if frames == 0 {
                break;
            }
            assert!(frames <= 300);
            assert_eq!(output[0].len(), frames);
            assert_eq!(output[1].len(), frames);
            if first_chunk {
                assert!((output[0][1] - AudioSampleSource::scale_s32(10)).abs() < 1e-6);
                assert!((output[1][1] + AudioSampleSource::scale_s32(10)).abs() < 1e-6);
                first_chunk = false;
            }
            total += frames;
        }
        assert_eq!(total, 1000);

        // Reads after the end keep returning 0.
        assert_eq!(source.next_chunk(&mut output, 300)?, 0);
        Ok(())
    }

    #[test]
    fn test_channel_mismatch_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("mono.wav");
        write_wav(path.clone(), vec![vec![1, 2, 3]], 48000)?;

        let mut source = AudioSampleSource::from_file(&path)?;
        let mut output = vec![Vec::new(); 2];
        assert!(source.next_chunk(&mut output, 16).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AudioSampleSource::from_file("/nonexistent/file.wav"),
            Err(SampleSourceError::IoError(_))
        ));
    }
}
