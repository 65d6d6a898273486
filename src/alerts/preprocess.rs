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

//! Warning assets are decoded once, shaped by the profile's static volume and balance,
//! hard-limited and then kept in memory until the profile or the asset changes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{AssetLoadError, Category};
use crate::audio::{transcode, AssetDecoder, DecodedAsset, StreamFormat, TranscodeError};
use crate::config::ConfigurationStore;

/// Samples are hard-limited to this magnitude after gains are applied.
const LIMIT: f32 = 0.9;

/// The peak the safe scaling factor brings a buffer down to at render time.
const HEADROOM: f32 = 0.7;

/// Per-channel gains derived from a 0-100 volume and a -100..100 balance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelGains {
    pub left: f32,
    pub right: f32,
    /// Used for mono assets and for any channel past the second.
    pub mono: f32,
}

impl ChannelGains {
    pub fn new(volume: f32, balance: f32) -> ChannelGains {
        let volume = volume.clamp(0.0, 100.0) / 100.0;
        let balance = balance.clamp(-100.0, 100.0) / 100.0;
        ChannelGains {
            left: volume * (1.0 - balance),
            right: volume * (1.0 + balance),
            mono: volume,
        }
    }

    /// Multiplies every gain by `factor`.
    pub fn scaled(self, factor: f32) -> ChannelGains {
        ChannelGains {
            left: self.left * factor,
            right: self.right * factor,
            mono: self.mono * factor,
        }
    }

    /// The gain for the given channel of a frame with `channels` channels.
    pub fn for_channel(&self, channel: usize, channels: usize) -> f32 {
        match (channels, channel) {
            (1, _) => self.mono,
            (_, 0) => self.left,
            (_, 1) => self.right,
            _ => self.mono,
        }
    }

    /// Applies the gains to interleaved `input`, appending the result to `output`.
    pub fn apply(&self, input: &[f32], channels: usize, output: &mut Vec<f32>) {
        let channels = channels.max(1);
        output.extend(
            input
                .iter()
                .enumerate()
                .map(|(i, sample)| sample * self.for_channel(i % channels, channels)),
        );
    }
}

/// A decoded, shaped and limited warning asset, ready to be streamed.
#[derive(Clone, Debug, PartialEq)]
pub struct PreprocessedBuffer {
    /// Interleaved samples, all within [-0.9, 0.9].
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Gain that brings the buffer's peak down to the headroom target. Never above 1.0.
    /// Applied at render time, not baked into the samples.
    pub safe_scaling: f32,
}

impl PreprocessedBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Converts the buffer to another output format. The result is limited again and its
    /// safe scaling measured afresh, since resampling can overshoot the original peak.
    pub fn transcoded(&self, format: StreamFormat) -> Result<PreprocessedBuffer, TranscodeError> {
        let mut samples = transcode(&self.samples, self.format(), format)?;
        limit(&mut samples);
        Ok(PreprocessedBuffer {
            safe_scaling: safe_scaling(&samples),
            samples,
            channels: format.channels,
            sample_rate: format.sample_rate,
        })
    }
}

fn limit(samples: &mut [f32]) {
    for sample in samples.iter_mut() {
        *sample = sample.clamp(-LIMIT, LIMIT);
    }
}

fn safe_scaling(samples: &[f32]) -> f32 {
    let peak = samples
        .iter()
        .fold(0.0f32, |peak, sample| peak.max(sample.abs()));
    if peak > 0.0 {
        (HEADROOM / peak).min(1.0)
    } else {
        1.0
    }
}

/// Shapes a decoded asset with the static volume and balance, limits it and measures the
/// safe scaling of the result.
pub fn preprocess(decoded: DecodedAsset, volume: f32, balance: f32) -> PreprocessedBuffer {
    let gains = ChannelGains::new(volume, balance);
    let channels = usize::from(decoded.channels.max(1));

    let mut samples = Vec::with_capacity(decoded.samples.len());
    gains.apply(&decoded.samples, channels, &mut samples);
    limit(&mut samples);

    PreprocessedBuffer {
        safe_scaling: safe_scaling(&samples),
        samples,
        channels: decoded.channels.max(1),
        sample_rate: decoded.sample_rate,
    }
}

/// The inputs a buffer was built from. A buffer is only rebuilt when these change.
#[derive(Clone, Debug, PartialEq)]
struct BufferSource {
    path: PathBuf,
    volume: f32,
    balance: f32,
    modified: Option<SystemTime>,
}

/// Holds the live preprocessed buffer for every category. Buffers are swapped in whole, so
/// the playback engine always sees either the old or the new buffer.
pub struct BufferBank {
    decoder: Arc<dyn AssetDecoder>,
    asset_root: PathBuf,
    buffers: RwLock<HashMap<Category, Arc<PreprocessedBuffer>>>,
    /// Also serializes rebuilds.
    sources: Mutex<HashMap<Category, BufferSource>>,
    /// Buffers converted to a device's format, with the buffer each was converted from.
    transcoded: Mutex<HashMap<(Category, StreamFormat), (Arc<PreprocessedBuffer>, Arc<PreprocessedBuffer>)>>,
}

impl BufferBank {
    pub fn new(decoder: Arc<dyn AssetDecoder>, asset_root: &Path) -> BufferBank {
        BufferBank {
            decoder,
            asset_root: asset_root.to_path_buf(),
            buffers: RwLock::new(HashMap::new()),
            sources: Mutex::new(HashMap::new()),
            transcoded: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the live buffer for the category, if one has been built.
    pub fn buffer(&self, category: Category) -> Option<Arc<PreprocessedBuffer>> {
        self.buffers.read().get(&category).cloned()
    }

    /// Returns `buffer` in the given format. Conversions are kept until the category's buffer
    /// is replaced, so each buffer is converted at most once per output format.
    pub fn transcoded(
        &self,
        category: Category,
        buffer: &Arc<PreprocessedBuffer>,
        format: StreamFormat,
    ) -> Result<Arc<PreprocessedBuffer>, TranscodeError> {
        if buffer.format() == format {
            return Ok(buffer.clone());
        }

        let mut transcoded = self.transcoded.lock();
        if let Some((source, converted)) = transcoded.get(&(category, format)) {
            if Arc::ptr_eq(source, buffer) {
                return Ok(converted.clone());
            }
        }

        let converted = Arc::new(buffer.transcoded(format)?);
        info!(
            category = %category,
            from = %buffer.format(),
            to = %format,
            frames = converted.frames(),
            "Converted warning buffer to output format"
        );
        transcoded.insert((category, format), (buffer.clone(), converted.clone()));
        Ok(converted)
    }

    /// Resolves an asset identifier. Relative identifiers live under the asset root.
    pub fn resolve_asset(&self, asset: &str) -> PathBuf {
        let path = Path::new(asset);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.asset_root.join(path)
        }
    }

    /// Rebuilds every buffer whose asset, static volume or balance differs from what it was
    /// built with. The store's active profile is read after the rebuild lock is taken, so
    /// concurrent refreshes always converge on the latest profile. Failed rebuilds keep the
    /// existing buffer. Returns the number of buffers rebuilt.
    pub fn refresh(&self, store: &ConfigurationStore) -> usize {
        let mut sources = self.sources.lock();
        let profile = store.active_profile();

        let mut rebuilt = 0;
        for category in Category::ALL {
            let path = self.resolve_asset(profile.audio_file(category));
            let source = BufferSource {
                modified: fs::metadata(&path).and_then(|m| m.modified()).ok(),
                path,
                volume: profile.preprocess_volume(category),
                balance: profile.balance(category),
            };
            if sources.get(&category) == Some(&source) {
                continue;
            }

            match self.load(&source) {
                Ok(buffer) => {
                    info!(
                        category = %category,
                        path = %source.path.display(),
                        frames = buffer.frames(),
                        safe_scaling = buffer.safe_scaling,
                        "Preprocessed warning asset"
                    );
                    self.buffers.write().insert(category, Arc::new(buffer));
                    self.transcoded
                        .lock()
                        .retain(|(converted, _), _| *converted != category);
                    sources.insert(category, source);
                    rebuilt += 1;
                }
                Err(e) => {
                    warn!(category = %category, err = %e, "Unable to load warning asset, keeping previous buffer");
                }
            }
        }

        rebuilt
    }

    /// Publishes a buffer directly, bypassing decoding.
    #[cfg(test)]
    pub fn insert(&self, category: Category, buffer: PreprocessedBuffer) {
        self.buffers.write().insert(category, Arc::new(buffer));
    }

    fn load(&self, source: &BufferSource) -> Result<PreprocessedBuffer, AssetLoadError> {
        debug!(path = %source.path.display(), "Decoding warning asset");
        let decoded = self
            .decoder
            .decode(&source.path)
            .map_err(|e| AssetLoadError::Decode {
                path: source.path.clone(),
                source: e,
            })?;
        if decoded.samples.is_empty() {
            return Err(AssetLoadError::Empty(source.path.clone()));
        }

        Ok(preprocess(decoded, source.volume, source.balance))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, time::Duration};

    use super::*;
    use crate::{
        audio::{mock, SymphoniaDecoder},
        testutil,
    };

    fn decoded(samples: Vec<f32>, channels: u16) -> DecodedAsset {
        DecodedAsset {
            samples,
            channels,
            sample_rate: 44100,
        }
    }

    #[test]
    fn test_channel_gains() {
        let centered = ChannelGains::new(50.0, 0.0);
        assert_eq!(0.5, centered.left);
        assert_eq!(0.5, centered.right);
        assert_eq!(0.5, centered.mono);

        let left = ChannelGains::new(50.0, -100.0);
        assert_eq!(1.0, left.left);
        assert_eq!(0.0, left.right);

        let right = ChannelGains::new(100.0, 50.0);
        assert_eq!(0.5, right.left);
        assert_eq!(1.5, right.right);

        // Out of range inputs are clamped.
        assert_eq!(ChannelGains::new(100.0, 100.0), ChannelGains::new(250.0, 400.0));
    }

    #[test]
    fn test_gains_by_channel_layout() {
        let gains = ChannelGains::new(80.0, 50.0);
        assert_eq!(gains.mono, gains.for_channel(0, 1));
        assert_eq!(gains.left, gains.for_channel(0, 2));
        assert_eq!(gains.right, gains.for_channel(1, 2));
        assert_eq!(gains.mono, gains.for_channel(2, 6));
    }

    #[test]
    fn test_limiter_bounds_every_sample() {
        let buffer = preprocess(decoded(vec![1.0, -1.0, 0.95, -0.3], 2), 100.0, 100.0);
        assert!(buffer.samples.iter().all(|s| s.abs() <= 0.9));
        // Full right balance silences the left channel.
        assert_eq!(0.0, buffer.samples[0]);
        assert_eq!(-0.6, buffer.samples[3]);
        assert_eq!(-0.9, buffer.samples[1]);
    }

    #[test]
    fn test_safe_scaling_bounds_peak() {
        let buffer = preprocess(decoded(vec![0.2, -0.9, 0.5, 0.1], 1), 100.0, 0.0);
        let peak = buffer.samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        assert!(buffer.safe_scaling <= 1.0);
        assert!(peak * buffer.safe_scaling <= 0.7 + 1e-6);
        assert!((buffer.safe_scaling - 0.7 / 0.9).abs() < 1e-6);

        // Quiet assets aren't boosted.
        let quiet = preprocess(decoded(vec![0.1, -0.2], 1), 100.0, 0.0);
        assert_eq!(1.0, quiet.safe_scaling);
    }

    #[test]
    fn test_silent_asset_has_unit_scaling() {
        let buffer = preprocess(decoded(vec![0.0; 16], 2), 100.0, 0.0);
        assert_eq!(1.0, buffer.safe_scaling);
        assert_eq!(8, buffer.frames());
    }

    #[test]
    fn test_preprocess_is_bit_identical() {
        // A clipping, unevenly balanced signal exercises every stage.
        let samples: Vec<f32> = (0..2048)
            .map(|i| 1.4 * (i as f32 * 0.037).sin() + 0.05 * (i as f32 * 0.91).cos())
            .collect();
        let input = decoded(samples, 2);

        let first = preprocess(input.clone(), 73.0, -35.0);
        let second = preprocess(input, 73.0, -35.0);

        assert!(first.samples.iter().any(|s| s.abs() == 0.9));
        assert_eq!(first.samples.len(), second.samples.len());
        for (a, b) in first.samples.iter().zip(second.samples.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(first.safe_scaling.to_bits(), second.safe_scaling.to_bits());
    }

    #[test]
    fn test_transcoded_buffer_is_limited_and_scaled() {
        let buffer = preprocess(decoded(vec![0.9; 4410], 1), 100.0, 0.0);
        let converted = buffer
            .transcoded(StreamFormat {
                sample_rate: 48000,
                channels: 2,
            })
            .unwrap();

        assert_eq!(2, converted.channels);
        assert_eq!(48000, converted.sample_rate);
        assert_eq!(4800, converted.frames());
        let peak = converted.samples.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        assert!(peak <= 0.9);
        assert!(peak * converted.safe_scaling <= 0.7 + 1e-6);
    }

    #[test]
    fn test_transcoded_once_per_buffer_and_format() {
        let bank = BufferBank::new(Arc::new(SymphoniaDecoder), Path::new("audio"));
        bank.insert(Category::AoaWarning, preprocess(decoded(vec![0.5; 64], 1), 100.0, 0.0));
        let buffer = bank.buffer(Category::AoaWarning).unwrap();
        let stereo = StreamFormat {
            sample_rate: 44100,
            channels: 2,
        };

        let first = bank.transcoded(Category::AoaWarning, &buffer, stereo).unwrap();
        let second = bank.transcoded(Category::AoaWarning, &buffer, stereo).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(128, first.samples.len());

        // Already in the requested format.
        let same = bank.transcoded(Category::AoaWarning, &buffer, buffer.format()).unwrap();
        assert!(Arc::ptr_eq(&buffer, &same));

        // A replaced buffer is converted again.
        bank.insert(Category::AoaWarning, preprocess(decoded(vec![0.25; 64], 1), 100.0, 0.0));
        let replaced = bank.buffer(Category::AoaWarning).unwrap();
        let third = bank.transcoded(Category::AoaWarning, &replaced, stereo).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(0.25, third.samples[0]);
    }

    fn bank_fixture(
        amplitude: f32,
    ) -> Result<(tempfile::TempDir, tempfile::TempDir, ConfigurationStore, BufferBank), Box<dyn std::error::Error>>
    {
        let profiles = testutil::profiles_dir(testutil::DEFAULT_PROFILE)?;
        let assets = testutil::asset_root(256, 2, amplitude)?;
        let store = ConfigurationStore::open(
            profiles.path(),
            Arc::new(mock::Backend::default()),
            None,
        )?;
        let bank = BufferBank::new(Arc::new(SymphoniaDecoder), assets.path());
        Ok((profiles, assets, store, bank))
    }

    #[test]
    fn test_refresh_builds_every_category() -> Result<(), Box<dyn std::error::Error>> {
        let (_profiles, _assets, store, bank) = bank_fixture(0.5)?;

        assert_eq!(2, bank.refresh(&store));
        let aoa = bank.buffer(Category::AoaWarning).ok_or("no aoa buffer")?;
        let stall = bank.buffer(Category::StallWarning).ok_or("no stall buffer")?;

        // The AoA tone is built at its start volume, the stall tone at the stall volume.
        assert!((aoa.samples[0] - 0.1).abs() < 1e-6);
        assert!((stall.samples[0] - 0.5).abs() < 1e-6);
        assert_eq!(256, aoa.frames());
        Ok(())
    }

    #[test]
    fn test_refresh_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let (_profiles, _assets, store, bank) = bank_fixture(0.5)?;

        assert_eq!(2, bank.refresh(&store));
        let before = bank.buffer(Category::StallWarning).ok_or("no stall buffer")?;
        assert_eq!(0, bank.refresh(&store));
        let after = bank.buffer(Category::StallWarning).ok_or("no stall buffer")?;
        assert!(Arc::ptr_eq(&before, &after));
        Ok(())
    }

    #[test]
    fn test_refresh_rebuilds_only_changed_category() -> Result<(), Box<dyn std::error::Error>> {
        let (profiles, _assets, store, bank) = bank_fixture(0.5)?;
        bank.refresh(&store);
        let aoa_before = bank.buffer(Category::AoaWarning).ok_or("no aoa buffer")?;

        testutil::rewrite_profile(
            &profiles.path().join("default.cfg"),
            &testutil::DEFAULT_PROFILE.replace("Stall_warning_balance = 0", "Stall_warning_balance = -100"),
            Duration::from_secs(10),
        )?;
        store.reload(None)?;

        assert_eq!(1, bank.refresh(&store));
        let aoa_after = bank.buffer(Category::AoaWarning).ok_or("no aoa buffer")?;
        assert!(Arc::ptr_eq(&aoa_before, &aoa_after));

        let stall = bank.buffer(Category::StallWarning).ok_or("no stall buffer")?;
        assert!((stall.samples[0] - 0.9).abs() < 1e-6);
        assert_eq!(0.0, stall.samples[1]);
        Ok(())
    }

    #[test]
    fn test_failed_load_keeps_previous_buffer() -> Result<(), Box<dyn std::error::Error>> {
        let (profiles, assets, store, bank) = bank_fixture(0.5)?;
        bank.refresh(&store);
        let before = bank.buffer(Category::AoaWarning).ok_or("no aoa buffer")?;

        fs::write(assets.path().join("broken.wav"), b"not audio")?;
        testutil::rewrite_profile(
            &profiles.path().join("default.cfg"),
            &testutil::DEFAULT_PROFILE.replace("aoa_warning.wav", "broken.wav"),
            Duration::from_secs(10),
        )?;
        store.reload(None)?;

        assert_eq!(0, bank.refresh(&store));
        let after = bank.buffer(Category::AoaWarning).ok_or("no aoa buffer")?;
        assert!(Arc::ptr_eq(&before, &after));
        Ok(())
    }

    #[test]
    fn test_missing_asset_leaves_category_empty() -> Result<(), Box<dyn std::error::Error>> {
        let (_profiles, assets, store, bank) = bank_fixture(0.5)?;
        fs::remove_file(assets.path().join("stall_warning.wav"))?;

        assert_eq!(1, bank.refresh(&store));
        assert!(bank.buffer(Category::AoaWarning).is_some());
        assert!(bank.buffer(Category::StallWarning).is_none());
        Ok(())
    }

    #[test]
    fn test_resolve_asset() {
        let bank = BufferBank::new(Arc::new(SymphoniaDecoder), Path::new("audio"));
        assert_eq!(Path::new("audio/tone.wav"), bank.resolve_asset("tone.wav"));
        assert_eq!(Path::new("/tmp/tone.wav"), bank.resolve_asset("/tmp/tone.wav"));
    }
}
