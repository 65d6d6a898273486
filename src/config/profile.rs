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

//! Warning profiles: the per-aircraft thresholds, volumes and devices, stored on disk as
//! `key = value` lines with `//` comments.

use std::fmt;

use crate::alerts::Category;
use crate::audio::DeviceSelector;

const AOA_WARNING_START: &str = "AOA_Warning_Start";
const AOA_WARNING_END: &str = "AOA_Warning_End";
const STALL_WARNING: &str = "Stall_warning";
const AOA_WARNING_START_VOLUME: &str = "AOA_warning_start_volume";
const AOA_WARNING_END_VOLUME: &str = "AOA_warning_end_volume";
const STALL_WARNING_VOLUME: &str = "Stall_warning_volume";
const AOA_WARNING_AUDIO_FILE: &str = "AOA_warning_audio_file";
const STALL_WARNING_AUDIO_FILE: &str = "Stall_warning_audio_file";
const AOA_WARNING_DEVICE_INDEX: &str = "AOA_warning_device_index";
const AOA_WARNING_DEVICE_NAME: &str = "AOA_warning_device_name";
const STALL_WARNING_DEVICE_INDEX: &str = "Stall_warning_device_index";
const STALL_WARNING_DEVICE_NAME: &str = "Stall_warning_device_name";
const AOA_WARNING_BALANCE: &str = "AOA_warning_balance";
const STALL_WARNING_BALANCE: &str = "Stall_warning_balance";

/// The comment marker in profile files.
const COMMENT: &str = "//";

/// The warning parameters for one aircraft. Angles are in the simulator's angle-of-attack
/// units, volumes are 0-100 and balances are -100 (left) to 100 (right).
///
/// The thresholds are expected to satisfy start < end < stall. Profiles that don't are still
/// usable: interpolation clamps, so the result is degenerate rather than undefined.
#[derive(Clone, Debug, PartialEq)]
pub struct WarningProfile {
    pub aoa_warning_start: f32,
    pub aoa_warning_end: f32,
    pub stall_warning: f32,
    pub aoa_warning_start_volume: f32,
    pub aoa_warning_end_volume: f32,
    pub stall_warning_volume: f32,
    pub aoa_warning_audio_file: String,
    pub stall_warning_audio_file: String,
    pub aoa_warning_device: DeviceSelector,
    pub stall_warning_device: DeviceSelector,
    pub aoa_warning_balance: f32,
    pub stall_warning_balance: f32,
}

impl Default for WarningProfile {
    fn default() -> Self {
        WarningProfile {
            aoa_warning_start: 15.0,
            aoa_warning_end: 25.0,
            stall_warning: 30.0,
            aoa_warning_start_volume: 20.0,
            aoa_warning_end_volume: 80.0,
            stall_warning_volume: 100.0,
            aoa_warning_audio_file: "aoa_warning.wav".to_string(),
            stall_warning_audio_file: "stall_warning.wav".to_string(),
            aoa_warning_device: DeviceSelector::Index(0),
            stall_warning_device: DeviceSelector::Index(0),
            aoa_warning_balance: 0.0,
            stall_warning_balance: 0.0,
        }
    }
}

/// A single profile line that couldn't be applied.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("line {line}: invalid value '{value}' for {key}: {reason}")]
pub struct FieldError {
    pub line: usize,
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// The result of parsing a profile file. Field errors are not fatal: the offending field
/// keeps the value it had in the base profile.
#[derive(Clone, Debug)]
pub struct ParsedProfile {
    pub profile: WarningProfile,
    pub errors: Vec<FieldError>,
}

impl WarningProfile {
    /// Parses profile text on top of `base`. Unknown keys are ignored.
    pub fn parse(text: &str, base: &WarningProfile) -> ParsedProfile {
        let mut profile = base.clone();
        let mut errors = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let Some((key, value)) = split_line(line) else {
                continue;
            };
            if let Err(reason) = profile.apply(key, value) {
                errors.push(FieldError {
                    line: index + 1,
                    key: key.to_string(),
                    value: value.to_string(),
                    reason,
                });
            }
        }

        ParsedProfile { profile, errors }
    }

    /// Applies a single key to the profile.
    fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            AOA_WARNING_START => self.aoa_warning_start = parse_float(value)?,
            AOA_WARNING_END => self.aoa_warning_end = parse_float(value)?,
            STALL_WARNING => self.stall_warning = parse_float(value)?,
            AOA_WARNING_START_VOLUME => self.aoa_warning_start_volume = parse_float(value)?,
            AOA_WARNING_END_VOLUME => self.aoa_warning_end_volume = parse_float(value)?,
            STALL_WARNING_VOLUME => self.stall_warning_volume = parse_float(value)?,
            AOA_WARNING_AUDIO_FILE => self.aoa_warning_audio_file = parse_text(value)?,
            STALL_WARNING_AUDIO_FILE => self.stall_warning_audio_file = parse_text(value)?,
            AOA_WARNING_DEVICE_INDEX => {
                self.aoa_warning_device = DeviceSelector::Index(parse_index(value)?)
            }
            AOA_WARNING_DEVICE_NAME => {
                self.aoa_warning_device = DeviceSelector::Name(parse_text(value)?)
            }
            STALL_WARNING_DEVICE_INDEX => {
                self.stall_warning_device = DeviceSelector::Index(parse_index(value)?)
            }
            STALL_WARNING_DEVICE_NAME => {
                self.stall_warning_device = DeviceSelector::Name(parse_text(value)?)
            }
            AOA_WARNING_BALANCE => self.aoa_warning_balance = parse_float(value)?,
            STALL_WARNING_BALANCE => self.stall_warning_balance = parse_float(value)?,
            _ => {}
        }
        Ok(())
    }

    /// The asset played for the given category.
    pub fn audio_file(&self, category: Category) -> &str {
        match category {
            Category::AoaWarning => &self.aoa_warning_audio_file,
            Category::StallWarning => &self.stall_warning_audio_file,
        }
    }

    /// The device the given category plays on.
    pub fn device(&self, category: Category) -> &DeviceSelector {
        match category {
            Category::AoaWarning => &self.aoa_warning_device,
            Category::StallWarning => &self.stall_warning_device,
        }
    }

    pub fn set_device(&mut self, category: Category, device: DeviceSelector) {
        match category {
            Category::AoaWarning => self.aoa_warning_device = device,
            Category::StallWarning => self.stall_warning_device = device,
        }
    }

    pub fn balance(&self, category: Category) -> f32 {
        match category {
            Category::AoaWarning => self.aoa_warning_balance,
            Category::StallWarning => self.stall_warning_balance,
        }
    }

    /// The static volume the category's asset is preprocessed at. The AoA warning uses its
    /// start volume since that's where the tone first becomes audible.
    pub fn preprocess_volume(&self, category: Category) -> f32 {
        match category {
            Category::AoaWarning => self.aoa_warning_start_volume,
            Category::StallWarning => self.stall_warning_volume,
        }
    }

    /// Returns true if the thresholds are ordered start < end < stall.
    pub fn thresholds_ordered(&self) -> bool {
        self.aoa_warning_start < self.aoa_warning_end && self.aoa_warning_end < self.stall_warning
    }
}

/// Renders the profile in the on-disk format.
impl fmt::Display for WarningProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} = {}", AOA_WARNING_START, self.aoa_warning_start)?;
        writeln!(f, "{} = {}", AOA_WARNING_END, self.aoa_warning_end)?;
        writeln!(f, "{} = {}", STALL_WARNING, self.stall_warning)?;
        writeln!(
            f,
            "{} = {}",
            AOA_WARNING_START_VOLUME, self.aoa_warning_start_volume
        )?;
        writeln!(f, "{} = {}", AOA_WARNING_END_VOLUME, self.aoa_warning_end_volume)?;
        writeln!(f, "{} = {}", STALL_WARNING_VOLUME, self.stall_warning_volume)?;
        writeln!(f, "{} = {}", AOA_WARNING_AUDIO_FILE, self.aoa_warning_audio_file)?;
        writeln!(
            f,
            "{} = {}",
            STALL_WARNING_AUDIO_FILE, self.stall_warning_audio_file
        )?;
        for category in Category::ALL {
            match self.device(category) {
                DeviceSelector::Index(index) => {
                    writeln!(f, "{} = {}", device_index_key(category), index)?
                }
                DeviceSelector::Name(name) => {
                    writeln!(f, "{} = {}", device_name_key(category), name)?
                }
            }
        }
        writeln!(f, "{} = {}", AOA_WARNING_BALANCE, self.aoa_warning_balance)?;
        write!(f, "{} = {}", STALL_WARNING_BALANCE, self.stall_warning_balance)
    }
}

fn device_index_key(category: Category) -> &'static str {
    match category {
        Category::AoaWarning => AOA_WARNING_DEVICE_INDEX,
        Category::StallWarning => STALL_WARNING_DEVICE_INDEX,
    }
}

fn device_name_key(category: Category) -> &'static str {
    match category {
        Category::AoaWarning => AOA_WARNING_DEVICE_NAME,
        Category::StallWarning => STALL_WARNING_DEVICE_NAME,
    }
}

/// Rewrites `*_device_index` lines for the given categories into `*_device_name` lines.
/// Every other line, comments included, is kept as-is.
pub fn rewrite_device_selectors(text: &str, resolved: &[(Category, String)]) -> String {
    let mut output = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        let (content, ending) = split_line_ending(line);
        let replacement = split_line(content).and_then(|(key, _)| {
            resolved
                .iter()
                .find(|(category, _)| device_index_key(*category) == key)
                .map(|(category, name)| {
                    let comment = content
                        .find(COMMENT)
                        .map(|pos| format!(" {}", &content[pos..]))
                        .unwrap_or_default();
                    format!("{} = {}{}", device_name_key(*category), name, comment)
                })
        });

        match replacement {
            Some(replacement) => {
                output.push_str(&replacement);
                output.push_str(ending);
            }
            None => output.push_str(line),
        }
    }

    output
}

/// Strips the comment and splits a line into a trimmed key and value.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = match line.find(COMMENT) {
        Some(pos) => &line[..pos],
        None => line,
    };
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else {
        (line, "")
    }
}

fn parse_float(value: &str) -> Result<f32, String> {
    match value.parse::<f32>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        Ok(_) => Err("value must be finite".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_index(value: &str) -> Result<usize, String> {
    value.parse::<usize>().map_err(|e| e.to_string())
}

fn parse_text(value: &str) -> Result<String, String> {
    if value.is_empty() {
        return Err("value is empty".to_string());
    }
    Ok(value.to_string())
}
