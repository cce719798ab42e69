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

//! Configuration for the sampler and the command line tools.

use std::path::Path;

pub mod error;
pub mod sampler;

pub use error::ConfigError;
pub use sampler::{MediaConfig, SamplerConfig};

/// Loads and validates a sampler configuration from a YAML file.
pub fn load(path: &Path) -> Result<SamplerConfig, ConfigError> {
    SamplerConfig::deserialize(path)
}
