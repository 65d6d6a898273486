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

use parking_lot::{Condvar, Mutex};

use super::PlaybackRequest;
use crate::playsync::CancelHandle;

#[derive(Default)]
struct SlotState {
    /// The request waiting to be rendered. Newer requests replace it.
    pending: Option<PlaybackRequest>,
    /// The handle of the request currently being rendered.
    rendering: Option<CancelHandle>,
    closed: bool,
}

/// A single-slot hand-off between the dispatcher and the playback thread. The most recent
/// request always wins: enqueueing replaces whatever is pending and never waits on the
/// renderer.
#[derive(Default)]
pub struct PendingSlot {
    state: Mutex<SlotState>,
    available: Condvar,
}

impl PendingSlot {
    pub fn new() -> PendingSlot {
        PendingSlot::default()
    }

    /// Drops the pending request and cancels the one being rendered, if any.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pending = None;
        if let Some(rendering) = &state.rendering {
            rendering.cancel();
        }
    }

    /// Replaces the pending request and wakes the consumer.
    pub fn enqueue(&self, request: PlaybackRequest) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.pending = Some(request);
        self.available.notify_one();
    }

    /// Blocks until a request is available, then hands it out along with the handle that
    /// will be raised if it's superseded. Returns None once the slot is closed.
    pub fn take(&self) -> Option<(PlaybackRequest, CancelHandle)> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(request) = state.pending.take() {
                let handle = CancelHandle::new();
                state.rendering = Some(handle.clone());
                return Some((request, handle));
            }
            self.available.wait(&mut state);
        }
    }

    /// Marks the given request as no longer rendering.
    pub fn finish(&self, handle: &CancelHandle) {
        let mut state = self.state.lock();
        if state
            .rendering
            .as_ref()
            .is_some_and(|rendering| rendering.same_request(handle))
        {
            state.rendering = None;
        }
    }

    /// Returns a copy of the pending request.
    #[cfg(test)]
    pub fn pending(&self) -> Option<PlaybackRequest> {
        self.state.lock().pending.clone()
    }

    /// Closes the slot. Pending requests are dropped, the rendering request is cancelled and
    /// the consumer is released.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending = None;
        if let Some(rendering) = &state.rendering {
            rendering.cancel();
        }
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;
    use crate::{alerts::Category, audio::DeviceSelector};

    fn request(category: Category, volume: f32) -> PlaybackRequest {
        PlaybackRequest {
            category,
            volume,
            balance: 0.0,
            device: DeviceSelector::Name("mock-device".to_string()),
        }
    }

    #[test]
    fn test_most_recent_request_wins() {
        let slot = PendingSlot::new();
        slot.enqueue(request(Category::AoaWarning, 20.0));
        slot.enqueue(request(Category::AoaWarning, 35.0));
        slot.enqueue(request(Category::StallWarning, 100.0));

        let (taken, _) = slot.take().expect("request");
        assert_eq!(request(Category::StallWarning, 100.0), taken);
        assert_eq!(None, slot.pending());
    }

    #[test]
    fn test_clear_drops_pending_and_cancels_rendering() {
        let slot = PendingSlot::new();
        slot.enqueue(request(Category::AoaWarning, 20.0));
        let (_, handle) = slot.take().expect("request");

        slot.enqueue(request(Category::AoaWarning, 30.0));
        slot.clear();

        assert!(handle.is_cancelled());
        assert_eq!(None, slot.pending());
    }

    #[test]
    fn test_finish_detaches_handle() {
        let slot = PendingSlot::new();
        slot.enqueue(request(Category::AoaWarning, 20.0));
        let (_, handle) = slot.take().expect("request");
        slot.finish(&handle);

        // Once finished, later clears no longer touch the old request.
        slot.clear();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_take_blocks_until_enqueue() {
        let slot = Arc::new(PendingSlot::new());
        let consumer = {
            let slot = slot.clone();
            thread::spawn(move || slot.take().map(|(request, _)| request))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());
        slot.enqueue(request(Category::StallWarning, 100.0));

        let taken = consumer.join().expect("consumer panicked");
        assert_eq!(Some(request(Category::StallWarning, 100.0)), taken);
    }

    #[test]
    fn test_close_releases_consumer() {
        let slot = Arc::new(PendingSlot::new());
        let consumer = {
            let slot = slot.clone();
            thread::spawn(move || slot.take().is_none())
        };

        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert!(consumer.join().expect("consumer panicked"));

        slot.enqueue(request(Category::AoaWarning, 20.0));
        assert_eq!(None, slot.pending());
    }
}
