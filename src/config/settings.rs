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

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use duration_string::DurationString;
use serde::Deserialize;

use super::ConfigError;

/// The prefix for environment variable overrides, e.g. `STALLHORN_PORT=4000`.
const ENV_PREFIX: &str = "STALLHORN";

const DEFAULT_PORT: u16 = 12345;
const DEFAULT_PROFILES_DIR: &str = "profiles";
const DEFAULT_ASSET_ROOT: &str = "audio";
const DEFAULT_POLL_INTERVAL: &str = "5s";
const DEFAULT_RENDER_CHUNK_FRAMES: usize = 512;

/// Which audio output backend to drive.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Cpal,
    Mock,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Cpal => write!(f, "cpal"),
            OutputKind::Mock => write!(f, "mock"),
        }
    }
}

/// Engine settings. Every field is optional in the YAML file and can be overridden from the
/// environment.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    /// The UDP port telemetry arrives on.
    port: u16,

    /// The directory holding per-aircraft profiles and the `default.cfg` template.
    profiles_dir: PathBuf,

    /// Relative asset identifiers are resolved under this directory.
    asset_root: PathBuf,

    /// How often the hot-reload monitor checks the active profile, e.g. "5s" or "500ms".
    poll_interval: String,

    /// The output backend.
    output: OutputKind,

    /// When set, a cancelled render stops at the next chunk boundary instead of finishing.
    preempt_rendering: bool,

    /// Frames written to the output per chunk.
    render_chunk_frames: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: DEFAULT_PORT,
            profiles_dir: PathBuf::from(DEFAULT_PROFILES_DIR),
            asset_root: PathBuf::from(DEFAULT_ASSET_ROOT),
            poll_interval: DEFAULT_POLL_INTERVAL.to_string(),
            output: OutputKind::default(),
            preempt_rendering: false,
            render_chunk_frames: DEFAULT_RENDER_CHUNK_FRAMES,
        }
    }
}

impl Settings {
    /// Loads settings from an optional YAML file, then applies `STALLHORN_*` environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.poll_interval()?;
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn profiles_dir(&self) -> &Path {
        &self.profiles_dir
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Returns the hot-reload poll interval.
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        DurationString::from_string(self.poll_interval.clone())
            .map(Into::into)
            .map_err(|e| ConfigError::Duration {
                value: self.poll_interval.clone(),
                reason: e.to_string(),
            })
    }

    pub fn output(&self) -> OutputKind {
        self.output
    }

    pub fn preempt_rendering(&self) -> bool {
        self.preempt_rendering
    }

    /// Returns the render chunk size in frames. Never zero.
    pub fn render_chunk_frames(&self) -> usize {
        self.render_chunk_frames.max(1)
    }

    #[cfg(test)]
    pub fn with_profiles_dir(mut self, profiles_dir: &Path) -> Settings {
        self.profiles_dir = profiles_dir.to_path_buf();
        self
    }

    #[cfg(test)]
    pub fn with_asset_root(mut self, asset_root: &Path) -> Settings {
        self.asset_root = asset_root.to_path_buf();
        self
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, poll_interval: &str) -> Settings {
        self.poll_interval = poll_interval.to_string();
        self
    }

    #[cfg(test)]
    pub fn with_preempt_rendering(mut self, preempt_rendering: bool) -> Settings {
        self.preempt_rendering = preempt_rendering;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs, time::Duration};

    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let settings = Settings::load(None)?;

        assert_eq!(12345, settings.port());
        assert_eq!(Path::new("profiles"), settings.profiles_dir());
        assert_eq!(Path::new("audio"), settings.asset_root());
        assert_eq!(Duration::from_secs(5), settings.poll_interval()?);
        assert_eq!(OutputKind::Cpal, settings.output());
        assert!(!settings.preempt_rendering());
        assert_eq!(512, settings.render_chunk_frames());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_yaml_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stallhorn.yaml");
        fs::write(
            &path,
            "port: 4000\nprofiles_dir: /opt/stallhorn/profiles\npoll_interval: 250ms\noutput: mock\npreempt_rendering: true\n",
        )?;

        let settings = Settings::load(Some(&path))?;
        assert_eq!(4000, settings.port());
        assert_eq!(
            Path::new("/opt/stallhorn/profiles"),
            settings.profiles_dir()
        );
        assert_eq!(Path::new("audio"), settings.asset_root());
        assert_eq!(Duration::from_millis(250), settings.poll_interval()?);
        assert_eq!(OutputKind::Mock, settings.output());
        assert!(settings.preempt_rendering());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stallhorn.yaml");
        fs::write(&path, "port: 4000\n")?;

        env::set_var("STALLHORN_PORT", "5000");
        let result = Settings::load(Some(&path));
        env::remove_var("STALLHORN_PORT");

        assert_eq!(5000, result?.port());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_poll_interval() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stallhorn.yaml");
        fs::write(&path, "poll_interval: often\n")?;

        match Settings::load(Some(&path)) {
            Err(ConfigError::Duration { value, .. }) => assert_eq!("often", value),
            other => panic!("expected duration error, got {:?}", other),
        }
        Ok(())
    }
}
