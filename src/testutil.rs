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
    fs::{self, File},
    path::Path,
    thread,
    time::{Duration, SystemTime},
};

use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

/// A profile matching the built-in defaults, with both devices selected by index.
pub const DEFAULT_PROFILE: &str = "// Default warning profile
AOA_Warning_Start = 15
AOA_Warning_End = 25
Stall_warning = 30

AOA_warning_start_volume = 20
AOA_warning_end_volume = 80
Stall_warning_volume = 100

AOA_warning_audio_file = aoa_warning.wav
Stall_warning_audio_file = stall_warning.wav

AOA_warning_device_index = 0 // first output device
Stall_warning_device_index = 0

AOA_warning_balance = 0
Stall_warning_balance = 0
";

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().unwrap_or_default();
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Writes interleaved samples as a 32-bit float WAV file.
pub fn write_wav(
    path: &Path,
    samples: &[f32],
    channels: u16,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Generates `frames` frames of a constant signal on every channel.
pub fn constant_signal(frames: usize, channels: u16, amplitude: f32) -> Vec<f32> {
    vec![amplitude; frames * usize::from(channels)]
}

/// Creates a temporary profiles directory holding `default.cfg` with the given contents.
pub fn profiles_dir(template: &str) -> Result<TempDir, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("default.cfg"), template)?;
    Ok(dir)
}

/// Creates a temporary asset root with constant-signal warning tones at the default names.
pub fn asset_root(frames: usize, channels: u16, amplitude: f32) -> Result<TempDir, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let signal = constant_signal(frames, channels, amplitude);
    write_wav(&dir.path().join("aoa_warning.wav"), &signal, channels, 44100)?;
    write_wav(&dir.path().join("stall_warning.wav"), &signal, channels, 44100)?;
    Ok(dir)
}

/// Rewrites a profile and moves its modification time `offset` into the future, so that
/// the change is visible regardless of filesystem timestamp granularity.
pub fn rewrite_profile(path: &Path, contents: &str, offset: Duration) -> Result<(), Box<dyn Error>> {
    fs::write(path, contents)?;
    File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now() + offset)?;
    Ok(())
}
