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
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::sample_source::SampleSourceError;
use crate::audio::AudioBuffer;

pub mod file;

pub use file::FileMediaResolver;

/// Identifies an item of project media, written as `<project>_<item>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectItemId {
    project: u64,
    item: u64,
}

impl ProjectItemId {
    pub fn new(project: u64, item: u64) -> ProjectItemId {
        ProjectItemId { project, item }
    }

    /// Parses an id of the form `<project>_<item>`, both parts decimal.
    pub fn parse(value: &str) -> Option<ProjectItemId> {
        let (project, item) = value.split_once('_')?;
        if project.is_empty()
            || item.is_empty()
            || !project.bytes().all(|b| b.is_ascii_digit())
            || !item.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        Some(ProjectItemId {
            project: project.parse().ok()?,
            item: item.parse().ok()?,
        })
    }

    pub fn project(&self) -> u64 {
        self.project
    }

    pub fn item(&self) -> u64 {
        self.item
    }
}

impl fmt::Display for ProjectItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.project, self.item)
    }
}

/// Where a sound's audio comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceRef {
    ProjectItem(ProjectItemId),
    File(PathBuf),
}

impl SourceRef {
    /// Interprets a stored source string. Anything that isn't a project item id is a file path.
    pub fn parse(value: &str) -> SourceRef {
        match ProjectItemId::parse(value) {
            Some(id) => SourceRef::ProjectItem(id),
            None => SourceRef::File(PathBuf::from(value)),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::ProjectItem(id) => write!(f, "{}", id),
            SourceRef::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Read of {num} frames at {start} is outside media of length {length}")]
    OutOfRange { start: u64, num: usize, length: u64 },

    #[error("Unable to decode media: {0}")]
    Source(#[from] SampleSourceError),
}

/// Random access to the decoded frames of a piece of media.
pub trait AudioReader: Send {
    fn sample_rate(&self) -> f64;

    fn num_channels(&self) -> usize;

    fn length_in_frames(&self) -> u64;

    fn duration(&self) -> Duration {
        if self.sample_rate() <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.length_in_frames() as f64 / self.sample_rate())
    }

    /// The MIDI note the media was recorded at, if its metadata says.
    fn root_note(&self) -> Option<u8> {
        None
    }

    /// Reads `num` frames starting at frame `start` into `dest` at `dest_start`,
    /// one destination channel per media channel. Frames that exist are copied
    /// even when the range runs past the end, in which case an error is returned.
    fn read(
        &mut self,
        start: u64,
        dest: &mut AudioBuffer,
        dest_start: usize,
        num: usize,
    ) -> Result<(), MediaError>;
}

/// Turns source references into readable media.
pub trait MediaResolver: Send + Sync {
    /// Returns a reader for the source, or None if it can't be found or decoded.
    fn resolve(&self, source: &SourceRef) -> Option<Box<dyn AudioReader>>;

    /// Forgets any cached media so the next resolve sees the current files.
    fn invalidate(&self) {}
}

/// Fully decoded media held in memory.
#[derive(Debug)]
pub struct DecodedMedia {
    pub audio: AudioBuffer,
    pub sample_rate: f64,
    pub root_note: Option<u8>,
}

impl DecodedMedia {
    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.audio.num_channels() * self.audio.num_frames() * std::mem::size_of::<f32>()
    }
}

/// An [AudioReader] over shared, already decoded media.
pub struct MemoryReader {
    media: Arc<DecodedMedia>,
}

impl MemoryReader {
    pub fn new(media: Arc<DecodedMedia>) -> MemoryReader {
        MemoryReader { media }
    }
}

impl AudioReader for MemoryReader {
    fn sample_rate(&self) -> f64 {
        self.media.sample_rate
    }

    fn num_channels(&self) -> usize {
        self.media.audio.num_channels()
    }

    fn length_in_frames(&self) -> u64 {
        self.media.audio.num_frames() as u64
    }

    fn root_note(&self) -> Option<u8> {
        self.media.root_note
    }

    fn read(
        &mut self,
        start: u64,
        dest: &mut AudioBuffer,
        dest_start: usize,
        num: usize,
    ) -> Result<(), MediaError> {
        let length = self.length_in_frames();
        let channels = self.num_channels().min(dest.num_channels());
        if start < length {
            for channel in 0..channels {
                dest.copy_from(
                    channel,
                    dest_start,
                    &self.media.audio,
                    channel,
                    start as usize,
                    num,
                );
            }
        }

        if start + num as u64 > length {
            return Err(MediaError::OutOfRange { start, num, length });
        }
        Ok(())
    }
}
