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

//! The alert-audio engine: telemetry is evaluated against the active warning profile, the
//! resulting request is handed to the playback thread through a single-slot queue, and the
//! playback thread renders the matching preprocessed buffer to the profile's output device.

use std::fmt;

use crate::audio::{DecodeError, DeviceSelector};

mod dispatcher;
mod engine;
mod monitor;
mod playback;
mod preprocess;
mod queue;
pub mod threshold;

pub use dispatcher::{evaluate, Dispatcher};
pub use engine::AlertEngine;
pub use monitor::HotReloadMonitor;
pub use playback::{OutputPool, PlaybackEngine, PlaybackError, RenderOutcome};
pub use preprocess::{preprocess, BufferBank, ChannelGains, PreprocessedBuffer};
pub use queue::PendingSlot;

/// The kinds of warning the engine can sound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    AoaWarning,
    StallWarning,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::AoaWarning, Category::StallWarning];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::AoaWarning => write!(f, "aoa-warning"),
            Category::StallWarning => write!(f, "stall-warning"),
        }
    }
}

/// A request to sound one warning at a live volume and balance.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackRequest {
    pub category: Category,
    /// 0-100.
    pub volume: f32,
    /// -100 (left) to 100 (right).
    pub balance: f32,
    pub device: DeviceSelector,
}

/// Errors produced while turning an asset into a preprocessed buffer.
#[derive(Debug, thiserror::Error)]
pub enum AssetLoadError {
    #[error("unable to decode {}: {source}", path.display())]
    Decode {
        path: std::path::PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("{} contains no audio", .0.display())]
    Empty(std::path::PathBuf),
}
