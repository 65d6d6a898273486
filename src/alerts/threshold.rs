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

/// Maps `x` onto a volume between `start_volume` and `end_volume`. Values at or below `start`
/// get `start_volume`, values at or above `end` get `end_volume`, and everything in between is
/// linearly interpolated. A zero-width range is a step at `start`. NaN maps to `start_volume`.
pub fn volume(x: f32, start: f32, end: f32, start_volume: f32, end_volume: f32) -> f32 {
    if x.is_nan() {
        return start_volume;
    }
    if start == end {
        return if x >= start { end_volume } else { start_volume };
    }
    if x <= start {
        return start_volume;
    }
    if x >= end {
        return end_volume;
    }

    start_volume + (x - start) / (end - start) * (end_volume - start_volume)
}
