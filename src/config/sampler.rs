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
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::media::ProjectItemId;
use crate::sampler::envelope::EnvelopeParameters;
use crate::sampler::library::MAX_SOUNDS;
use crate::sampler::pool::MAX_VOICES;
use crate::sampler::state::SoundEntry;

/// Default output sample rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default number of frames rendered at a time.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// A YAML representation of a sampler.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct SamplerConfig {
    /// The output sample rate.
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,

    /// Frames rendered per block when rendering offline.
    #[serde(default = "default_block_size")]
    block_size: usize,

    /// The most voices that can sound at once.
    #[serde(default = "default_max_voices")]
    max_voices: usize,

    /// The envelope applied to every voice.
    #[serde(default)]
    envelope: EnvelopeParameters,

    /// Where media is found.
    #[serde(default)]
    media: MediaConfig,

    /// The sounds, in order.
    #[serde(default)]
    sounds: Vec<SoundEntry>,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_max_voices() -> usize {
    MAX_VOICES
}

impl SamplerConfig {
    /// Parses and validates a sampler configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<SamplerConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<SamplerConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a sampler configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<SamplerConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<SamplerConfig>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".into()));
        }
        if self.max_voices == 0 {
            return Err(ConfigError::Invalid("max_voices must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.envelope.sustain) {
            return Err(ConfigError::Invalid(format!(
                "envelope sustain must be between 0 and 1, got {}",
                self.envelope.sustain
            )));
        }
        let envelope = &self.envelope;
        if [envelope.attack, envelope.decay, envelope.release]
            .iter()
            .any(|t| !t.is_finite() || *t < 0.0)
        {
            return Err(ConfigError::Invalid(
                "envelope times must not be negative".into(),
            ));
        }
        if self.sounds.len() > MAX_SOUNDS {
            return Err(ConfigError::Invalid(format!(
                "at most {} sounds are supported, got {}",
                MAX_SOUNDS,
                self.sounds.len()
            )));
        }
        if let Some(sound) = self.sounds.iter().find(|s| s.source.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "sound \"{}\" has no source",
                sound.name
            )));
        }
        self.media.project_items()?;
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    pub fn envelope(&self) -> EnvelopeParameters {
        self.envelope
    }

    pub fn media(&self) -> &MediaConfig {
        &self.media
    }

    pub fn sounds(&self) -> &[SoundEntry] {
        &self.sounds
    }
}

/// Where sound sources are found.
#[derive(Deserialize, Clone, Serialize, Debug, Default)]
pub struct MediaConfig {
    /// The directory relative file sources are found in. Relative to the config file.
    base_path: Option<PathBuf>,

    /// Files for project media ids, keyed by `<project>_<item>`.
    #[serde(default)]
    project_items: HashMap<String, PathBuf>,
}

impl MediaConfig {
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// The project media map, with its ids parsed.
    pub fn project_items(&self) -> Result<HashMap<ProjectItemId, PathBuf>, ConfigError> {
        self.project_items
            .iter()
            .map(|(id, path)| match ProjectItemId::parse(id) {
                Some(id) => Ok((id, path.clone())),
                None => Err(ConfigError::Invalid(format!(
                    "invalid project item id \"{}\", expected <project>_<item>",
                    id
                ))),
            })
            .collect()
    }
}
