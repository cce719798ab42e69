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
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{AudioReader, DecodedMedia, MediaResolver, MemoryReader, ProjectItemId, SourceRef};
use crate::audio::sample_source::{create_sample_source_from_file, SampleSource, SampleSourceError};
use crate::audio::AudioBuffer;

/// Frames requested from the decoder per read.
const DECODE_CHUNK_FRAMES: usize = 4096;

/// Resolves sources to audio files on disk, decoding each file once and caching it.
pub struct FileMediaResolver {
    /// Relative file paths are resolved against this directory.
    base_path: PathBuf,
    /// Files backing project media ids.
    project_items: HashMap<ProjectItemId, PathBuf>,
    /// Decoded files by full path.
    cache: Mutex<HashMap<PathBuf, Arc<DecodedMedia>>>,
}

impl FileMediaResolver {
    pub fn new(base_path: &Path, project_items: HashMap<ProjectItemId, PathBuf>) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            project_items,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Gets the file a source refers to, if any.
    pub fn resolve_path(&self, source: &SourceRef) -> Option<PathBuf> {
        let file = match source {
            SourceRef::File(file) => file,
            SourceRef::ProjectItem(id) => self.project_items.get(id)?,
        };

        Some(if file.is_absolute() {
            file.clone()
        } else {
            self.base_path.join(file)
        })
    }

    /// Returns the total memory used by cached media.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.lock().values().map(|m| m.memory_size()).sum()
    }

    /// Loads a file into memory, returning the cached copy if it's already loaded.
    fn load(&self, path: &Path) -> Result<Arc<DecodedMedia>, SampleSourceError> {
        if let Some(media) = self.cache.lock().get(path) {
            debug!(path = ?path, "Using cached media");
            return Ok(media.clone());
        }

        info!(path = ?path, "Loading media into memory");

        // Decoding happens outside the cache lock so several files can load at once.
        let mut source = create_sample_source_from_file(path)?;
        let sample_rate = source.sample_rate() as f64;
        let audio = decode_all(&mut source)?;
        let media = Arc::new(DecodedMedia {
            audio,
            sample_rate,
            root_note: read_wav_root_note(path),
        });

        info!(
            path = ?path,
            channels = media.audio.num_channels(),
            sample_rate,
            frames = media.audio.num_frames(),
            root_note = ?media.root_note,
            memory_kb = media.memory_size() / 1024,
            "Media loaded"
        );

        Ok(self
            .cache
            .lock()
            .entry(path.to_path_buf())
            .or_insert(media)
            .clone())
    }
}

impl MediaResolver for FileMediaResolver {
    fn resolve(&self, source: &SourceRef) -> Option<Box<dyn AudioReader>> {
        let Some(path) = self.resolve_path(source) else {
            warn!(source = %source, "Unknown project media");
            return None;
        };

        match self.load(&path) {
            Ok(media) => Some(Box::new(MemoryReader::new(media))),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to load media");
                None
            }
        }
    }

    fn invalidate(&self) {
        let mut cache = self.cache.lock();
        debug!(entries = cache.len(), "Invalidating media cache");
        cache.clear();
    }
}

/// Reads a sample source to the end into a planar buffer.
pub fn decode_all(source: &mut dyn SampleSource) -> Result<AudioBuffer, SampleSourceError> {
    let channels = source.channel_count() as usize;
    let mut audio = AudioBuffer::new(channels, 0);
    let mut chunk = vec![Vec::new(); channels];

    loop {
        let frames = source.next_chunk(&mut chunk, DECODE_CHUNK_FRAMES)?;
        if frames == 0 {
            break;
        }
        audio.append(&AudioBuffer::from_channels(chunk.clone()), frames);
    }

    Ok(audio)
}

/// Reads the MIDI unity note from the `smpl` chunk of a RIFF/WAVE file.
/// Returns None for anything that isn't a WAV file with that chunk.
pub fn read_wav_root_note(path: &Path) -> Option<u8> {
    let mut reader = BufReader::new(File::open(path).ok()?);

    let mut header = [0u8; 12];
    reader.read_exact(&mut header).ok()?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return None;
    }

    let mut chunk_header = [0u8; 8];
    while reader.read_exact(&mut chunk_header).is_ok() {
        let size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]);
        if &chunk_header[0..4] == b"smpl" {
            // Manufacturer, product and sample period precede the unity note.
            let mut fields = [0u8; 16];
            reader.read_exact(&mut fields).ok()?;
            let note = u32::from_le_bytes([fields[12], fields[13], fields[14], fields[15]]);
            return u8::try_from(note).ok().filter(|n| *n <= 127);
        }

        // Chunks are padded to an even size.
        let skip = size as i64 + (size & 1) as i64;
        reader.seek(SeekFrom::Current(skip)).ok()?;
    }

    None
}
