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
use std::path::PathBuf;

/// Error types for decoding audio assets.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{}': {source}", path.display())]
    Unsupported {
        path: PathBuf,
        #[source]
        source: symphonia::core::errors::Error,
    },

    #[error("Audio file error: {0}")]
    AudioError(#[from] symphonia::core::errors::Error),

    #[error("'{}': no audio track found", .0.display())]
    NoAudioTrack(PathBuf),

    #[error("'{}': sample rate or channel layout not specified", .0.display())]
    FormatNotSpecified(PathBuf),
}

/// Error types for converting buffers between output formats.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("cannot convert {from} to {to}")]
    InvalidFormat {
        from: super::StreamFormat,
        to: super::StreamFormat,
    },

    #[error("unable to create resampler for {from}Hz -> {to}Hz: {source}")]
    Resampler {
        from: u32,
        to: u32,
        #[source]
        source: rubato::ResamplerConstructionError,
    },

    #[error("Resampling failed: {0}")]
    Resampling(#[from] rubato::ResampleError),
}
