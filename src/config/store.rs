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
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{
    profile::{rewrite_device_selectors, WarningProfile},
    ConfigError,
};
use crate::{
    alerts::Category,
    audio::{resolve_selector, DeviceSelector, OutputBackend},
};

/// The template new aircraft profiles are cloned from. Also the profile used when no aircraft
/// has been seen yet.
const TEMPLATE_NAME: &str = "default";

const PROFILE_EXTENSION: &str = "cfg";

/// An immutable view of the active profile and the file it came from.
#[derive(Debug)]
pub struct ProfileSnapshot {
    aircraft: Option<String>,
    path: PathBuf,
    profile: Arc<WarningProfile>,
    modified: SystemTime,
}

#[cfg(test)]
impl ProfileSnapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The modification time of the backing file as of the last load.
    pub fn modified(&self) -> SystemTime {
        self.modified
    }
}

/// Holds the live warning profile. Readers get cheap `Arc` snapshots; every load, reload
/// and profile file rewrite is serialized through a single writer lock, so the dispatcher
/// and the hot-reload monitor can't interleave writes to the same file.
pub struct ConfigurationStore {
    profiles_dir: PathBuf,
    devices: Arc<dyn OutputBackend>,
    active: RwLock<Arc<ProfileSnapshot>>,
    writer: Mutex<()>,
}

impl ConfigurationStore {
    /// Opens the store and loads the profile for the given aircraft, or the default template.
    pub fn open(
        profiles_dir: &Path,
        devices: Arc<dyn OutputBackend>,
        aircraft: Option<&str>,
    ) -> Result<ConfigurationStore, ConfigError> {
        let names = device_names(devices.as_ref())?;
        if names.is_empty() {
            return Err(ConfigError::NoOutputDevice(devices.host_name()));
        }

        let snapshot = read_snapshot(profiles_dir, devices.as_ref(), aircraft, None)?;
        info!(
            path = %snapshot.path.display(),
            aircraft = snapshot.aircraft.as_deref().unwrap_or(TEMPLATE_NAME),
            "Loaded warning profile"
        );

        Ok(ConfigurationStore {
            profiles_dir: profiles_dir.to_path_buf(),
            devices,
            active: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// Makes the given aircraft's profile active, cloning the template if the aircraft has
    /// never been seen before.
    pub fn load(&self, aircraft: Option<&str>) -> Result<Arc<WarningProfile>, ConfigError> {
        self.reload(aircraft)
    }

    /// Re-parses the given aircraft's profile and atomically replaces the active one.
    pub fn reload(&self, aircraft: Option<&str>) -> Result<Arc<WarningProfile>, ConfigError> {
        let _writer = self.writer.lock();
        self.replace(aircraft)
    }

    /// Reloads the active profile if its backing file changed since it was loaded. Returns the
    /// new profile, or None if nothing changed.
    pub fn reload_if_modified(&self) -> Result<Option<Arc<WarningProfile>>, ConfigError> {
        let _writer = self.writer.lock();

        let current = self.snapshot();
        let modified = self.current_modification_time()?;
        if modified == current.modified {
            return Ok(None);
        }

        debug!(path = %current.path.display(), "Profile modified, reloading");
        self.replace(current.aircraft.as_deref()).map(Some)
    }

    /// The last-write time of the active profile's backing file.
    pub fn current_modification_time(&self) -> Result<SystemTime, ConfigError> {
        modification_time(&self.snapshot().path)
    }

    /// Returns the live profile.
    pub fn active_profile(&self) -> Arc<WarningProfile> {
        self.active.read().profile.clone()
    }

    /// Returns the aircraft the live profile belongs to.
    pub fn active_aircraft(&self) -> Option<String> {
        self.active.read().aircraft.clone()
    }

    pub fn snapshot(&self) -> Arc<ProfileSnapshot> {
        self.active.read().clone()
    }

    /// Must be called with the writer lock held.
    fn replace(&self, aircraft: Option<&str>) -> Result<Arc<WarningProfile>, ConfigError> {
        let previous = self.snapshot();
        let snapshot = read_snapshot(
            &self.profiles_dir,
            self.devices.as_ref(),
            aircraft,
            Some(&previous),
        )?;
        let profile = snapshot.profile.clone();

        info!(
            path = %snapshot.path.display(),
            aircraft = snapshot.aircraft.as_deref().unwrap_or(TEMPLATE_NAME),
            "Loaded warning profile"
        );
        *self.active.write() = Arc::new(snapshot);
        Ok(profile)
    }
}

/// Maps an aircraft identifier onto a safe file stem.
fn sanitize(aircraft: &str) -> String {
    aircraft
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn profile_path(profiles_dir: &Path, aircraft: Option<&str>) -> PathBuf {
    let stem = match aircraft {
        Some(aircraft) => sanitize(aircraft),
        None => TEMPLATE_NAME.to_string(),
    };
    profiles_dir.join(stem).with_extension(PROFILE_EXTENSION)
}

fn modification_time(path: &Path) -> Result<SystemTime, ConfigError> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|e| ConfigError::io(path, e))
}

fn device_names(devices: &dyn OutputBackend) -> Result<Vec<String>, ConfigError> {
    devices
        .device_names()
        .map_err(|e| ConfigError::DeviceEnumeration(e.to_string()))
}

/// Reads a profile from disk, creating it from the template if needed and persisting any
/// index device selectors as names.
fn read_snapshot(
    profiles_dir: &Path,
    devices: &dyn OutputBackend,
    aircraft: Option<&str>,
    previous: Option<&ProfileSnapshot>,
) -> Result<ProfileSnapshot, ConfigError> {
    let path = profile_path(profiles_dir, aircraft);

    if !path.exists() {
        let template = profile_path(profiles_dir, None);
        if !template.exists() {
            return Err(ConfigError::MissingTemplate(template));
        }
        fs::copy(&template, &path).map_err(|e| ConfigError::io(&path, e))?;
        info!(
            path = %path.display(),
            template = %template.display(),
            "Created profile from template"
        );
    }

    let text = fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;

    // Fields that fail to parse keep the value from the last good read of the same file.
    let base = match previous {
        Some(previous) if previous.path == path => previous.profile.as_ref().clone(),
        _ => WarningProfile::default(),
    };
    let parsed = WarningProfile::parse(&text, &base);
    for error in &parsed.errors {
        warn!(path = %path.display(), %error, "Ignoring invalid profile field");
    }
    let mut profile = parsed.profile;

    let indexed: Vec<(Category, DeviceSelector)> = Category::ALL
        .into_iter()
        .filter(|category| matches!(profile.device(*category), DeviceSelector::Index(_)))
        .map(|category| (category, profile.device(category).clone()))
        .collect();

    if !indexed.is_empty() {
        let names = device_names(devices)?;
        let mut resolved = Vec::with_capacity(indexed.len());
        for (category, selector) in indexed {
            let name = resolve_selector(&names, &selector)
                .ok_or_else(|| ConfigError::NoOutputDevice(devices.host_name()))?;
            info!(
                category = %category,
                selector = %selector,
                device = %name,
                "Resolved device index"
            );
            profile.set_device(category, DeviceSelector::Name(name.clone()));
            resolved.push((category, name));
        }

        let rewritten = rewrite_device_selectors(&text, &resolved);
        if rewritten != text {
            fs::write(&path, rewritten).map_err(|e| ConfigError::io(&path, e))?;
            debug!(path = %path.display(), "Persisted resolved device names");
        }
    }

    let modified = modification_time(&path)?;

    Ok(ProfileSnapshot {
        aircraft: aircraft.map(str::to_string),
        path,
        profile: Arc::new(profile),
        modified,
    })
}
