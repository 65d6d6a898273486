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
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, warn};

/// Environment variable overriding the playback thread priority (0-99).
const THREAD_PRIORITY_ENV: &str = "STALLHORN_THREAD_PRIORITY";

/// Default priority for the playback thread when STALLHORN_THREAD_PRIORITY is unset.
const DEFAULT_PLAYBACK_THREAD_PRIORITY: u8 = 70;

/// Reads STALLHORN_THREAD_PRIORITY once; invalid or out of range values use the default.
pub fn playback_thread_priority() -> ThreadPriority {
    let value = std::env::var(THREAD_PRIORITY_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_PLAYBACK_THREAD_PRIORITY);

    match ThreadPriorityValue::try_from(value) {
        Ok(value) => ThreadPriority::Crossplatform(value),
        Err(_) => ThreadPriority::Max,
    }
}

/// Raises the current thread's priority. Failing to do so (usually a permissions issue) only
/// costs latency, so it's logged and otherwise ignored.
pub fn raise_current_thread_priority(priority: ThreadPriority) {
    match set_current_thread_priority(priority) {
        Ok(()) => debug!(priority = ?priority, "Raised thread priority"),
        Err(e) => warn!(err = ?e, "Unable to raise thread priority"),
    }
}
