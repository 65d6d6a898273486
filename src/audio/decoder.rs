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
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use super::error::DecodeError;

/// A fully decoded audio asset.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAsset {
    /// Interleaved samples in the range [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedAsset {
    /// Number of frames (samples per channel).
    #[cfg(test)]
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Turns an asset file into raw interleaved samples.
pub trait AssetDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedAsset, DecodeError>;
}

/// Decodes WAV, FLAC, OGG, MP3 and anything else symphonia can probe.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl AssetDecoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedAsset, DecodeError> {
        // Include the path in the error so the user sees which asset failed.
        let file = File::open(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|source| DecodeError::Unsupported {
                path: path.to_path_buf(),
                source,
            })?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::NoAudioTrack(path.to_path_buf()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;
        let mut channels = track.codec_params.channels.map(|c| c.count() as u16);

        let mut decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|source| DecodeError::Unsupported {
                path: path.to_path_buf(),
                source,
            })?;

        let mut samples = Vec::new();
        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    // A single corrupt packet shouldn't take down the whole asset.
                    warn!(path = ?path, err = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Containers don't always report the layout up front.
            let spec = *decoded.spec();
            channels.get_or_insert(spec.channels.count() as u16);
            sample_rate.get_or_insert(spec.rate);

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        let channels = channels
            .filter(|channels| *channels > 0)
            .ok_or_else(|| DecodeError::FormatNotSpecified(path.to_path_buf()))?;
        let sample_rate = sample_rate
            .ok_or_else(|| DecodeError::FormatNotSpecified(path.to_path_buf()))?;

        debug!(
            path = ?path,
            channels,
            sample_rate,
            samples = samples.len(),
            "Asset decoded"
        );

        Ok(DecodedAsset {
            samples,
            channels,
            sample_rate,
        })
    }
}
