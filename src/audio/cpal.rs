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
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, warn, Level};

use super::{ring::SampleRing, OutputBackend, OutputConnection, StreamFormat};

/// How long a writer backs off when the ring is full.
const RING_FULL_BACKOFF: Duration = Duration::from_micros(500);

/// Output devices under the preferred low-latency host API. On Windows that's WASAPI; other
/// platforms use their default host.
pub struct Backend {
    host_id: cpal::HostId,
}

impl Backend {
    /// Gets the preferred low-latency host.
    pub fn preferred() -> Result<Backend, Box<dyn Error>> {
        #[cfg(target_os = "windows")]
        let host_id = cpal::host_from_id(cpal::HostId::Wasapi)?.id();
        #[cfg(not(target_os = "windows"))]
        let host_id = cpal::default_host().id();

        Ok(Backend { host_id })
    }

    /// Lists the host's devices that can output audio, in enumeration order.
    fn output_devices(&self) -> Result<Vec<(String, cpal::Device)>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices = Vec::new();
        for device in cpal::host_from_id(self.host_id)?.output_devices()? {
            let has_output = match device.supported_output_configs() {
                Ok(mut configs) => configs.any(|config| config.channels() > 0),
                Err(_) => false,
            };
            if !has_output {
                continue;
            }

            match device.name() {
                Ok(name) => devices.push((name.trim().to_string(), device)),
                Err(e) => error!(err = %e, "Unable to read output device name"),
            }
        }

        Ok(devices)
    }
}

impl OutputBackend for Backend {
    fn host_name(&self) -> String {
        self.host_id.name().to_string()
    }

    fn device_names(&self) -> Result<Vec<String>, Box<dyn Error>> {
        Ok(self
            .output_devices()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    fn open(
        &self,
        device: &str,
        format: StreamFormat,
    ) -> Result<Box<dyn OutputConnection>, Box<dyn Error>> {
        match self
            .output_devices()?
            .into_iter()
            .find(|(name, _)| name == device)
        {
            Some((name, device)) => Ok(Box::new(Connection::open(name, device, format)?)),
            None => Err(format!("no device found with name {}", device).into()),
        }
    }
}

/// Sample formats the stream callbacks can feed.
const CALLBACK_SAMPLE_FORMATS: [cpal::SampleFormat; 3] = [
    cpal::SampleFormat::F32,
    cpal::SampleFormat::I16,
    cpal::SampleFormat::I32,
];

/// Picks the stream configuration for a requested format. A supported configuration with the
/// requested channel count and rate is used if the device has one; otherwise the device's
/// default configuration is used and callers convert to it.
fn negotiate(
    device: &cpal::Device,
    requested: StreamFormat,
) -> Result<cpal::SupportedStreamConfig, Box<dyn Error>> {
    let rate = requested.sample_rate;
    let supported = device.supported_output_configs()?.find(|range| {
        range.channels() == requested.channels
            && range.min_sample_rate().0 <= rate
            && rate <= range.max_sample_rate().0
            && CALLBACK_SAMPLE_FORMATS.contains(&range.sample_format())
    });
    if let Some(range) = supported {
        return Ok(range.with_sample_rate(cpal::SampleRate(rate)));
    }

    let default = device.default_output_config()?;
    warn!(
        requested = %requested,
        rate = default.sample_rate().0,
        channels = default.channels(),
        "Device doesn't support the requested format, using its default"
    );
    Ok(default)
}

/// f32 callback: read directly into the cpal buffer.
fn create_f32_callback(
    ring: Arc<SampleRing>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let read = ring.read(data);
        // Zero-fill any shortfall
        data[read..].fill(0.0);
    }
}

/// Integer callback: read from the ring into scratch space and convert.
fn create_converting_callback<T>(
    ring: Arc<SampleRing>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(data.len(), 0.0);
        let read = ring.read(&mut scratch);
        scratch[read..].fill(0.0);

        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// A persistent cpal output stream. The stream lives on its own thread, since cpal streams
/// can't be moved between threads on every platform, and is fed through a ring buffer.
pub struct Connection {
    /// The device name.
    name: String,
    /// The format the stream runs at.
    format: StreamFormat,
    /// Samples waiting for the device callback.
    ring: Arc<SampleRing>,
    /// Set by the stream's error callback.
    failed: Arc<AtomicBool>,
    /// Dropping or sending on this releases the stream thread.
    shutdown_tx: Mutex<Option<crossbeam_channel::Sender<()>>>,
    /// The thread that owns the stream.
    stream_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Connection {
    /// Opens and starts a stream on the given device, at the requested format if the device
    /// supports it and at its default format otherwise.
    fn open(
        name: String,
        device: cpal::Device,
        requested: StreamFormat,
    ) -> Result<Connection, Box<dyn Error>> {
        let supported = negotiate(&device, requested)?;
        let sample_format = supported.sample_format();
        let config = supported.config();
        let format = StreamFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        // ~100ms of audio.
        let capacity = (format.sample_rate as usize * format.channels as usize) / 10;
        let ring = Arc::new(SampleRing::new(capacity.max(1024)));
        let failed = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let stream_thread = {
            let ring = ring.clone();
            let failed = failed.clone();
            let name = name.clone();
            thread::Builder::new()
                .name(format!("output-{}", name))
                .spawn(move || {
                    let span = span!(Level::INFO, "output stream (cpal)");
                    let _enter = span.enter();

                    let on_error = move |err: cpal::StreamError| {
                        error!(err = %err, "CPAL output stream error");
                        failed.store(true, Ordering::Release);
                    };

                    let stream_result = match sample_format {
                        cpal::SampleFormat::F32 => device.build_output_stream(
                            &config,
                            create_f32_callback(ring),
                            on_error,
                            None,
                        ),
                        cpal::SampleFormat::I16 => device.build_output_stream(
                            &config,
                            create_converting_callback::<i16>(ring),
                            on_error,
                            None,
                        ),
                        cpal::SampleFormat::I32 => device.build_output_stream(
                            &config,
                            create_converting_callback::<i32>(ring),
                            on_error,
                            None,
                        ),
                        other => {
                            let _ = ready_tx
                                .send(Err(format!("unsupported device sample format {:?}", other)));
                            return;
                        }
                    };

                    let stream = match stream_result {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }

                    info!(device = %name, format = %format, "CPAL output stream started");
                    let _ = ready_tx.send(Ok(()));

                    // Keep the stream alive until the connection is closed.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    info!(device = %name, "CPAL output stream stopped");
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Connection {
                name,
                format,
                ring,
                failed,
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                stream_thread: Mutex::new(Some(stream_thread)),
            }),
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = stream_thread.join();
                Err("output thread exited before the stream started".into())
            }
        }
    }
}

impl OutputConnection for Connection {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn write(&self, samples: &[f32]) -> Result<(), Box<dyn Error>> {
        let mut offset = 0;
        while offset < samples.len() {
            if self.failed.load(Ordering::Acquire) {
                return Err(format!("output stream for {} failed", self.name).into());
            }
            if self.shutdown_tx.lock().is_none() {
                return Err(format!("output stream for {} is closed", self.name).into());
            }

            let written = self.ring.write(&samples[offset..]);
            offset += written;
            if written == 0 {
                // Ring full, wait for the device to drain it.
                spin_sleep::sleep(RING_FULL_BACKOFF);
            }
        }
        Ok(())
    }

    fn close(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(stream_thread) = self.stream_thread.lock().take() {
            if stream_thread.join().is_err() {
                error!(device = %self.name, "Output stream thread panicked");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) (buffered={})",
            self.name,
            self.format,
            self.ring.available()
        )
    }
}
