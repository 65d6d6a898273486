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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{OutputBackend, OutputConnection, StreamFormat};

/// The device a mock backend exposes when none are given.
const DEFAULT_MOCK_DEVICE: &str = "mock-device";

/// A single write made through a mock connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Write {
    pub device: String,
    pub format: StreamFormat,
    pub samples: Vec<f32>,
}

/// A mock output backend. Doesn't actually play anything, but records every write so tests
/// can inspect what would have been heard.
#[derive(Clone)]
pub struct Backend {
    /// The devices this backend enumerates, in index order.
    devices: Arc<Mutex<Vec<String>>>,
    /// Every write made through any connection opened by this backend.
    writes: Arc<Mutex<Vec<Write>>>,
    /// Number of connections opened.
    opened: Arc<AtomicUsize>,
    /// Number of connections closed.
    closed: Arc<AtomicUsize>,
    /// How long each write takes, simulating a device draining its buffer.
    write_delay: Duration,
    /// The only format the devices run at, if they can't take any requested format.
    supported_format: Option<StreamFormat>,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::new(vec![DEFAULT_MOCK_DEVICE.to_string()])
    }
}

impl Backend {
    /// Creates a mock backend exposing the given devices.
    pub fn new(devices: Vec<String>) -> Backend {
        Backend {
            devices: Arc::new(Mutex::new(devices)),
            writes: Arc::new(Mutex::new(Vec::new())),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            write_delay: Duration::ZERO,
            supported_format: None,
        }
    }

    /// Makes every write take the given amount of time.
    #[cfg(test)]
    pub fn with_write_delay(mut self, write_delay: Duration) -> Backend {
        self.write_delay = write_delay;
        self
    }

    /// Restricts the devices to a single format. Connections requested at any other format
    /// open at this one instead, the way a device falls back to its mix format.
    #[cfg(test)]
    pub fn with_supported_format(mut self, format: StreamFormat) -> Backend {
        self.supported_format = Some(format);
        self
    }

    /// Replaces the enumerated devices, simulating the host re-enumerating.
    #[cfg(test)]
    pub fn set_devices(&self, devices: Vec<String>) {
        *self.devices.lock() = devices;
    }

    /// Returns every write made so far.
    #[cfg(test)]
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    /// Returns the number of connections opened so far.
    #[cfg(test)]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Returns the number of connections closed so far.
    #[cfg(test)]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::Relaxed)
    }
}

impl OutputBackend for Backend {
    fn host_name(&self) -> String {
        "Mock".to_string()
    }

    fn device_names(&self) -> Result<Vec<String>, Box<dyn Error>> {
        Ok(self.devices.lock().clone())
    }

    fn open(
        &self,
        device: &str,
        format: StreamFormat,
    ) -> Result<Box<dyn OutputConnection>, Box<dyn Error>> {
        if !self.devices.lock().iter().any(|name| name == device) {
            return Err(format!("no device found with name {}", device).into());
        }

        let format = match self.supported_format {
            Some(supported) if supported != format => {
                info!(device, requested = %format, format = %supported, "Mock device falling back to its format");
                supported
            }
            _ => format,
        };

        info!(device, format = %format, "Opening mock output connection");
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(Connection {
            device: device.to_string(),
            format,
            writes: self.writes.clone(),
            closed_count: self.closed.clone(),
            is_closed: AtomicBool::new(false),
            write_delay: self.write_delay,
        }))
    }
}

/// A connection to a mock device.
struct Connection {
    device: String,
    format: StreamFormat,
    writes: Arc<Mutex<Vec<Write>>>,
    closed_count: Arc<AtomicUsize>,
    is_closed: AtomicBool,
    write_delay: Duration,
}

impl OutputConnection for Connection {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn write(&self, samples: &[f32]) -> Result<(), Box<dyn Error>> {
        if self.is_closed.load(Ordering::Acquire) {
            return Err(format!("connection to {} is closed", self.device).into());
        }
        if !self.write_delay.is_zero() {
            spin_sleep::sleep(self.write_delay);
        }

        self.writes.lock().push(Write {
            device: self.device.clone(),
            format: self.format,
            samples: samples.to_vec(),
        });
        Ok(())
    }

    fn close(&self) {
        if !self.is_closed.swap(true, Ordering::AcqRel) {
            debug!(device = %self.device, "Closing mock output connection");
            self.closed_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) (Mock)", self.device, self.format)
    }
}
