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
use std::{error::Error, fmt, sync::Arc};

use crate::config::OutputKind;

pub mod cpal;
pub mod decoder;
pub mod error;
pub mod mock;
mod ring;
pub mod thread_priority;
pub mod transcoder;

pub use decoder::{AssetDecoder, DecodedAsset, SymphoniaDecoder};
pub use error::{DecodeError, TranscodeError};
pub use transcoder::transcode;

/// Identifies an output device, either by its position among the preferred host's output
/// devices or by its name. Indices are only stable for as long as the host enumerates devices
/// in the same order, so profiles persist the name form once an index has been resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    Index(usize),
    Name(String),
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Index(index) => write!(f, "#{}", index),
            DeviceSelector::Name(name) => write!(f, "{}", name),
        }
    }
}

/// The sample layout an output connection was opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

/// A host audio output subsystem. Device indices are scoped to a single host API class, so
/// `device_names` only reports output devices under that class, in enumeration order.
pub trait OutputBackend: Send + Sync {
    /// The name of the host API class device indices are scoped to.
    fn host_name(&self) -> String;

    /// Lists the eligible output devices in index order.
    fn device_names(&self) -> Result<Vec<String>, Box<dyn Error>>;

    /// Opens a persistent output connection to the named device.
    fn open(
        &self,
        device: &str,
        format: StreamFormat,
    ) -> Result<Box<dyn OutputConnection>, Box<dyn Error>>;
}

/// A persistent stream to a single output device.
pub trait OutputConnection: fmt::Display + Send + Sync {
    /// The format the connection was opened with.
    fn format(&self) -> StreamFormat;

    /// Queues interleaved samples for playback, blocking while the device buffer is full.
    fn write(&self, samples: &[f32]) -> Result<(), Box<dyn Error>>;

    /// Stops the stream and releases the host resources. Idempotent.
    fn close(&self);
}

/// Gets the output backend for the configured output kind.
pub fn get_backend(kind: OutputKind) -> Result<Arc<dyn OutputBackend>, Box<dyn Error>> {
    match kind {
        OutputKind::Cpal => Ok(Arc::new(cpal::Backend::preferred()?)),
        OutputKind::Mock => Ok(Arc::new(mock::Backend::default())),
    }
}

/// Lists the eligible output devices along with their host-scoped index.
pub fn list_devices(backend: &dyn OutputBackend) -> Result<Vec<String>, Box<dyn Error>> {
    Ok(backend
        .device_names()?
        .into_iter()
        .enumerate()
        .map(|(index, name)| format!("[{}] {}", index, name))
        .collect())
}

/// Resolves a selector against the given device list. Indices beyond the end of the list fall
/// back to the first device. Names are returned as-is. Returns None only when there are no
/// devices at all.
pub fn resolve_selector(names: &[String], selector: &DeviceSelector) -> Option<String> {
    let first = names.first()?;
    match selector {
        DeviceSelector::Index(index) => Some(names.get(*index).unwrap_or(first).clone()),
        DeviceSelector::Name(name) => Some(name.clone()),
    }
}
