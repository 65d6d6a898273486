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
use rubato::{
    SincFixedIn, SincInterpolationParameters, SincInterpolationType, VecResampler, WindowFunction,
};

use super::{error::TranscodeError, StreamFormat};

/// Input block size for the sinc resampler.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Converts interleaved samples from one stream format to another. Channels are mapped
/// first: mono is copied to every output channel, anything mixed down to mono is averaged,
/// and otherwise matching channels are copied and extra output channels are silent. The
/// result is then resampled to the target rate.
pub fn transcode(
    samples: &[f32],
    from: StreamFormat,
    to: StreamFormat,
) -> Result<Vec<f32>, TranscodeError> {
    if from.channels == 0 || to.channels == 0 || from.sample_rate == 0 || to.sample_rate == 0 {
        return Err(TranscodeError::InvalidFormat { from, to });
    }
    if from == to {
        return Ok(samples.to_vec());
    }

    let planar = map_channels(samples, usize::from(from.channels), usize::from(to.channels));
    let planar = if from.sample_rate == to.sample_rate {
        planar
    } else {
        resample(planar, from.sample_rate, to.sample_rate)?
    };

    Ok(interleave(&planar))
}

/// Deinterleaves into `to` planar channels.
fn map_channels(samples: &[f32], from: usize, to: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / from;
    let mut planar = vec![Vec::with_capacity(frames); to];

    for frame in samples.chunks_exact(from) {
        let mixed = frame.iter().sum::<f32>() / from as f32;
        for (channel, output) in planar.iter_mut().enumerate() {
            let sample = if from == 1 {
                frame[0]
            } else if to == 1 {
                mixed
            } else {
                frame.get(channel).copied().unwrap_or(0.0)
            };
            output.push(sample);
        }
    }

    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map(|c| c.len()).unwrap_or(0);
    let mut samples = Vec::with_capacity(frames * planar.len());
    for frame in 0..frames {
        samples.extend(planar.iter().map(|channel| channel[frame]));
    }
    samples
}

/// Resamples a whole planar buffer. The resampler's delay is trimmed from the front and the
/// output is cut to the length the rate ratio gives.
fn resample(input: Vec<Vec<f32>>, from: u32, to: u32) -> Result<Vec<Vec<f32>>, TranscodeError> {
    let channels = input.len();
    let frames = input.first().map(|c| c.len()).unwrap_or(0);
    if frames == 0 {
        return Ok(input);
    }

    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(to) / f64::from(from);
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, INPUT_BLOCK_SIZE, channels)
            .map_err(|source| TranscodeError::Resampler { from, to, source })?;

    let delay = resampler.output_delay();
    let expected = (frames as f64 * ratio).ceil() as usize;
    let mut output = vec![Vec::with_capacity(expected + delay); channels];
    let mut scratch = resampler.output_buffer_allocate(true);
    let mut block = vec![Vec::with_capacity(INPUT_BLOCK_SIZE); channels];

    let mut position = 0;
    loop {
        let needed = resampler.input_frames_next();
        if frames - position < needed {
            break;
        }
        fill_block(&mut block, &input, position, position + needed);
        let (read, written) = resampler.process_into_buffer(&block, &mut scratch, None)?;
        position += read;
        append(&mut output, &scratch, written);
    }

    if position < frames {
        fill_block(&mut block, &input, position, frames);
        let (_, written) =
            resampler.process_partial_into_buffer(Some(&block as &[Vec<f32>]), &mut scratch, None)?;
        append(&mut output, &scratch, written);
    }

    // Flush what's still inside the filter.
    while output[0].len() < expected + delay {
        let (_, written) = resampler.process_partial_into_buffer(None, &mut scratch, None)?;
        if written == 0 {
            break;
        }
        append(&mut output, &scratch, written);
    }

    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
    }
    Ok(output)
}

fn fill_block(block: &mut [Vec<f32>], input: &[Vec<f32>], start: usize, end: usize) {
    for (dst, src) in block.iter_mut().zip(input) {
        dst.clear();
        dst.extend_from_slice(&src[start..end]);
    }
}

fn append(output: &mut [Vec<f32>], scratch: &[Vec<f32>], frames: usize) {
    for (dst, src) in output.iter_mut().zip(scratch) {
        dst.extend_from_slice(&src[..frames.min(src.len())]);
    }
}
