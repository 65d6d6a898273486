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

//! The playback engine: a single consumer thread rendering the most recent request to its
//! output device.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, span, warn, Level};

use super::{BufferBank, Category, ChannelGains, PendingSlot, PlaybackRequest};
use crate::audio::{
    resolve_selector, DeviceSelector, OutputBackend, OutputConnection, StreamFormat, TranscodeError,
};
use crate::playsync::CancelHandle;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("no buffer loaded for {0}")]
    UnknownCategory(Category),

    #[error("unable to open output stream on {device}: {reason}")]
    StreamOpen { device: String, reason: String },

    #[error("write to {device} failed: {reason}")]
    Write { device: String, reason: String },

    #[error("unable to convert {category} for {device}: {source}")]
    Transcode {
        category: Category,
        device: String,
        #[source]
        source: TranscodeError,
    },
}

/// How a render ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed,
    /// Stopped early at a chunk boundary because a newer request arrived.
    Preempted,
}

/// An open connection and the format it was requested with. The device may have settled on
/// a different format.
struct PooledConnection {
    requested: StreamFormat,
    connection: Arc<dyn OutputConnection>,
}

impl PooledConnection {
    fn serves(&self, format: StreamFormat) -> bool {
        self.requested == format || self.connection.format() == format
    }
}

/// Output connections, opened lazily, one per device, kept until shutdown.
pub struct OutputPool {
    backend: Arc<dyn OutputBackend>,
    connections: Mutex<HashMap<String, PooledConnection>>,
}

impl OutputPool {
    pub fn new(backend: Arc<dyn OutputBackend>) -> OutputPool {
        OutputPool {
            backend,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the connection for the selected device, opening it if needed. A connection is
    /// reused when it was requested with `format` or the device runs at `format`; otherwise
    /// it's closed and reopened. The returned connection's format may still differ from
    /// `format` if the device doesn't support it.
    pub fn connection(
        &self,
        selector: &DeviceSelector,
        format: StreamFormat,
    ) -> Result<Arc<dyn OutputConnection>, PlaybackError> {
        let device = match selector {
            DeviceSelector::Name(name) => name.clone(),
            DeviceSelector::Index(_) => {
                let names = self
                    .backend
                    .device_names()
                    .map_err(|e| PlaybackError::StreamOpen {
                        device: selector.to_string(),
                        reason: e.to_string(),
                    })?;
                resolve_selector(&names, selector).ok_or_else(|| PlaybackError::StreamOpen {
                    device: selector.to_string(),
                    reason: format!("no output devices on {}", self.backend.host_name()),
                })?
            }
        };

        let mut connections = self.connections.lock();
        if let Some(pooled) = connections.get(&device) {
            if pooled.serves(format) {
                return Ok(pooled.connection.clone());
            }
            info!(
                device = %device,
                from = %pooled.connection.format(),
                to = %format,
                "Output format changed, reopening connection"
            );
            pooled.connection.close();
            connections.remove(&device);
        }

        let connection: Arc<dyn OutputConnection> = Arc::from(
            self.backend
                .open(&device, format)
                .map_err(|e| PlaybackError::StreamOpen {
                    device: device.clone(),
                    reason: e.to_string(),
                })?,
        );
        info!(connection = %connection, requested = %format, "Opened output connection");
        connections.insert(
            device,
            PooledConnection {
                requested: format,
                connection: connection.clone(),
            },
        );
        Ok(connection)
    }

    /// Closes and forgets a connection so the next request reopens it.
    pub fn discard(&self, connection: &Arc<dyn OutputConnection>) {
        self.connections
            .lock()
            .retain(|_, pooled| !Arc::ptr_eq(&pooled.connection, connection));
        connection.close();
    }

    /// Closes every connection.
    pub fn close_all(&self) {
        for (device, pooled) in self.connections.lock().drain() {
            debug!(device = %device, "Closing output connection");
            pooled.connection.close();
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }
}

/// Renders requests from the pending slot until the slot is closed.
pub struct PlaybackEngine {
    slot: Arc<PendingSlot>,
    bank: Arc<BufferBank>,
    pool: Arc<OutputPool>,
    /// Stop renders at the next chunk boundary once they're superseded.
    preempt: bool,
    chunk_frames: usize,
}

impl PlaybackEngine {
    pub fn new(
        slot: Arc<PendingSlot>,
        bank: Arc<BufferBank>,
        pool: Arc<OutputPool>,
        preempt: bool,
        chunk_frames: usize,
    ) -> PlaybackEngine {
        PlaybackEngine {
            slot,
            bank,
            pool,
            preempt,
            chunk_frames: chunk_frames.max(1),
        }
    }

    /// The consumer loop. Errors are logged and the request dropped; the loop only ends
    /// when the slot is closed.
    pub fn run(&self) {
        let span = span!(Level::INFO, "playback");
        let _enter = span.enter();
        info!(preempt = self.preempt, chunk_frames = self.chunk_frames, "Playback engine started");

        while let Some((request, handle)) = self.slot.take() {
            match self.render(&request, &handle) {
                Ok(RenderOutcome::Completed) => {
                    debug!(category = %request.category, volume = request.volume, "Warning rendered")
                }
                Ok(RenderOutcome::Preempted) => {
                    debug!(category = %request.category, "Warning superseded mid-render")
                }
                Err(e) => {
                    warn!(category = %request.category, err = %e, "Dropping playback request")
                }
            }
            self.slot.finish(&handle);
        }

        info!("Playback engine stopped");
    }

    /// Streams the request's buffer to its device with the live gains, converted to the
    /// device's format if it couldn't open at the buffer's own.
    pub fn render(
        &self,
        request: &PlaybackRequest,
        handle: &CancelHandle,
    ) -> Result<RenderOutcome, PlaybackError> {
        let buffer = self
            .bank
            .buffer(request.category)
            .ok_or(PlaybackError::UnknownCategory(request.category))?;
        let connection = self.pool.connection(&request.device, buffer.format())?;
        let buffer = self
            .bank
            .transcoded(request.category, &buffer, connection.format())
            .map_err(|source| PlaybackError::Transcode {
                category: request.category,
                device: request.device.to_string(),
                source,
            })?;

        let gains = ChannelGains::new(request.volume, request.balance).scaled(buffer.safe_scaling);
        let channels = usize::from(buffer.channels);
        let mut chunk = Vec::with_capacity(self.chunk_frames * channels);

        for frames in buffer.samples.chunks(self.chunk_frames * channels) {
            if self.preempt && handle.is_cancelled() {
                return Ok(RenderOutcome::Preempted);
            }

            chunk.clear();
            gains.apply(frames, channels, &mut chunk);
            if let Err(e) = connection.write(&chunk) {
                self.pool.discard(&connection);
                return Err(PlaybackError::Write {
                    device: request.device.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(RenderOutcome::Completed)
    }
}
