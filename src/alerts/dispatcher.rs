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
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{threshold, BufferBank, Category, PendingSlot, PlaybackRequest};
use crate::config::{ConfigurationStore, WarningProfile};
use crate::telemetry::TelemetryRecord;

/// How long a failed aircraft profile load is remembered before telemetry for the same
/// aircraft tries it again.
const FAILED_LOAD_RETRY: Duration = Duration::from_secs(5);

/// Evaluates the profile's thresholds for an angle of attack. Above the warning start the
/// AoA tone plays at an interpolated volume; at or above the stall angle the stall tone plays
/// at its fixed volume. Anything else is silence.
pub fn evaluate(profile: &WarningProfile, aoa: f32) -> Option<PlaybackRequest> {
    if aoa >= profile.stall_warning {
        return Some(request(
            profile,
            Category::StallWarning,
            profile.stall_warning_volume,
        ));
    }
    if aoa > profile.aoa_warning_start {
        let volume = threshold::volume(
            aoa,
            profile.aoa_warning_start,
            profile.aoa_warning_end,
            profile.aoa_warning_start_volume,
            profile.aoa_warning_end_volume,
        );
        return Some(request(profile, Category::AoaWarning, volume));
    }
    None
}

fn request(profile: &WarningProfile, category: Category, volume: f32) -> PlaybackRequest {
    PlaybackRequest {
        category,
        volume,
        balance: profile.balance(category),
        device: profile.device(category).clone(),
    }
}

/// Turns telemetry into playback requests. Cheap to clone; every clone feeds the same slot.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<ConfigurationStore>,
    bank: Arc<BufferBank>,
    slot: Arc<PendingSlot>,
    /// The last aircraft whose profile failed to load, and when.
    failed_load: Arc<Mutex<Option<(String, Instant)>>>,
    load_retry: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<ConfigurationStore>,
        bank: Arc<BufferBank>,
        slot: Arc<PendingSlot>,
    ) -> Dispatcher {
        Dispatcher {
            store,
            bank,
            slot,
            failed_load: Arc::new(Mutex::new(None)),
            load_retry: FAILED_LOAD_RETRY,
        }
    }

    #[cfg(test)]
    pub fn with_load_retry(mut self, load_retry: Duration) -> Dispatcher {
        self.load_retry = load_retry;
        self
    }

    /// Handles one telemetry record. Never waits on rendering. Returns the request that was
    /// queued, if any.
    pub fn on_telemetry(&self, record: &TelemetryRecord) -> Option<PlaybackRequest> {
        if let Some(aircraft) = record.aircraft.as_deref() {
            if self.store.active_aircraft().as_deref() != Some(aircraft) {
                self.switch_aircraft(aircraft);
            }
        }

        self.slot.clear();
        let request = evaluate(&self.store.active_profile(), record.aoa)?;
        debug!(
            ias = record.ias,
            aoa = record.aoa,
            category = %request.category,
            volume = request.volume,
            "Queueing warning"
        );
        self.slot.enqueue(request.clone());
        Some(request)
    }

    /// Loads the aircraft's profile and rebuilds the buffers before anything is evaluated
    /// against it. After a failed load, the same aircraft isn't tried again until the retry
    /// interval passes; the previous profile stays active meanwhile.
    fn switch_aircraft(&self, aircraft: &str) {
        let mut failed_load = self.failed_load.lock();
        if let Some((failed, at)) = failed_load.as_ref() {
            if failed == aircraft && at.elapsed() < self.load_retry {
                return;
            }
        }

        info!(aircraft, "Aircraft changed, loading profile");
        match self.store.load(Some(aircraft)) {
            Ok(_) => {
                *failed_load = None;
                drop(failed_load);
                self.bank.refresh(&self.store);
            }
            Err(e) => {
                error!(aircraft, err = %e, retry = ?self.load_retry, "Unable to load aircraft profile");
                *failed_load = Some((aircraft.to_string(), Instant::now()));
            }
        }
    }
}
