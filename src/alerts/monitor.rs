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

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, span, warn, Level};

use super::BufferBank;
use crate::config::ConfigurationStore;

/// Polls the active profile for changes and refreshes the store and the buffers.
pub struct HotReloadMonitor {
    store: Arc<ConfigurationStore>,
    bank: Arc<BufferBank>,
    interval: Duration,
}

impl HotReloadMonitor {
    pub fn new(
        store: Arc<ConfigurationStore>,
        bank: Arc<BufferBank>,
        interval: Duration,
    ) -> HotReloadMonitor {
        HotReloadMonitor {
            store,
            bank,
            interval,
        }
    }

    /// Runs a single poll. The buffers are refreshed on every poll so that edited assets are
    /// picked up even when the profile itself is unchanged. Returns true if the profile was
    /// reloaded.
    pub fn poll_once(&self) -> bool {
        let reloaded = match self.store.reload_if_modified() {
            Ok(Some(profile)) => {
                info!(
                    aircraft = self.store.active_aircraft().as_deref().unwrap_or("default"),
                    aoa_warning_start = profile.aoa_warning_start,
                    aoa_warning_end = profile.aoa_warning_end,
                    stall_warning = profile.stall_warning,
                    "Profile reloaded"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(err = %e, "Unable to check profile for changes");
                false
            }
        };

        let rebuilt = self.bank.refresh(&self.store);
        if rebuilt > 0 {
            debug!(rebuilt, "Warning buffers rebuilt");
        }
        reloaded
    }

    /// Polls until the shutdown channel receives a message or is disconnected.
    pub fn run(&self, shutdown: Receiver<()>) {
        let span = span!(Level::INFO, "hot reload");
        let _enter = span.enter();
        info!(interval = ?self.interval, "Hot-reload monitor started");

        loop {
            match shutdown.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => {
                    self.poll_once();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("Hot-reload monitor stopped");
    }
}
