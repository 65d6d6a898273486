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

use std::error::Error;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{error, info};

use super::{BufferBank, Dispatcher, HotReloadMonitor, OutputPool, PendingSlot, PlaybackEngine};
use crate::audio::{
    thread_priority::{playback_thread_priority, raise_current_thread_priority},
    AssetDecoder, OutputBackend,
};
use crate::config::{ConfigurationStore, Settings};

/// Owns the shared state and the playback and hot-reload threads.
pub struct AlertEngine {
    store: Arc<ConfigurationStore>,
    bank: Arc<BufferBank>,
    slot: Arc<PendingSlot>,
    pool: Arc<OutputPool>,
    monitor_shutdown: Option<Sender<()>>,
    playback_thread: Option<JoinHandle<()>>,
    monitor_thread: Option<JoinHandle<()>>,
}

impl AlertEngine {
    /// Loads the default profile, preprocesses the warning assets and starts the playback
    /// and hot-reload threads.
    pub fn start(
        settings: &Settings,
        backend: Arc<dyn OutputBackend>,
        decoder: Arc<dyn AssetDecoder>,
    ) -> Result<AlertEngine, Box<dyn Error>> {
        let poll_interval = settings.poll_interval()?;
        let store = Arc::new(ConfigurationStore::open(
            settings.profiles_dir(),
            backend.clone(),
            None,
        )?);
        let bank = Arc::new(BufferBank::new(decoder, settings.asset_root()));
        bank.refresh(&store);

        let slot = Arc::new(PendingSlot::new());
        let pool = Arc::new(OutputPool::new(backend));

        let playback = PlaybackEngine::new(
            slot.clone(),
            bank.clone(),
            pool.clone(),
            settings.preempt_rendering(),
            settings.render_chunk_frames(),
        );
        let playback_thread = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                raise_current_thread_priority(playback_thread_priority());
                playback.run();
            })?;

        let (monitor_shutdown, shutdown_rx) = crossbeam_channel::bounded(1);
        let monitor = HotReloadMonitor::new(store.clone(), bank.clone(), poll_interval);
        let monitor_thread = match thread::Builder::new()
            .name("hot-reload".to_string())
            .spawn(move || monitor.run(shutdown_rx))
        {
            Ok(handle) => handle,
            Err(e) => {
                slot.close();
                let _ = playback_thread.join();
                return Err(e.into());
            }
        };

        info!(
            profiles_dir = %settings.profiles_dir().display(),
            asset_root = %settings.asset_root().display(),
            poll_interval = ?poll_interval,
            "Alert engine started"
        );

        Ok(AlertEngine {
            store,
            bank,
            slot,
            pool,
            monitor_shutdown: Some(monitor_shutdown),
            playback_thread: Some(playback_thread),
            monitor_thread: Some(monitor_thread),
        })
    }

    /// Returns a dispatcher feeding this engine.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.store.clone(), self.bank.clone(), self.slot.clone())
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.store
    }

    #[cfg(test)]
    pub fn bank(&self) -> &Arc<BufferBank> {
        &self.bank
    }

    /// Stops both threads and closes every output connection. Idempotent.
    pub fn shutdown(&mut self) {
        self.slot.close();
        if let Some(monitor_shutdown) = self.monitor_shutdown.take() {
            let _ = monitor_shutdown.send(());
        }

        for (name, handle) in [
            ("playback", self.playback_thread.take()),
            ("hot-reload", self.monitor_thread.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(thread = name, "Thread panicked");
                }
            }
        }

        if self.pool.len() > 0 {
            info!(connections = self.pool.len(), "Closing output connections");
        }
        self.pool.close_all();
    }
}

impl Drop for AlertEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        alerts::Category,
        audio::{mock, SymphoniaDecoder},
        config::Settings,
        telemetry::TelemetryRecord,
        testutil::{self, eventually},
    };

    struct Fixture {
        profiles: tempfile::TempDir,
        _assets: tempfile::TempDir,
        backend: mock::Backend,
        engine: AlertEngine,
    }

    /// One second of mono audio at 44.1kHz, written in 512 frame chunks.
    const TONE_FRAMES: usize = 44100;

    fn fixture(
        backend: mock::Backend,
        preempt: bool,
    ) -> Result<Fixture, Box<dyn std::error::Error>> {
        let profiles = testutil::profiles_dir(testutil::DEFAULT_PROFILE)?;
        let assets = testutil::asset_root(TONE_FRAMES, 1, 0.5)?;
        let settings = Settings::default()
            .with_profiles_dir(profiles.path())
            .with_asset_root(assets.path())
            .with_poll_interval("20ms")
            .with_preempt_rendering(preempt);

        let engine = AlertEngine::start(
            &settings,
            Arc::new(backend.clone()),
            Arc::new(SymphoniaDecoder),
        )?;
        Ok(Fixture {
            profiles,
            _assets: assets,
            backend,
            engine,
        })
    }

    fn record(aoa: f32) -> TelemetryRecord {
        TelemetryRecord {
            ias: 180.0,
            aoa,
            aircraft: None,
        }
    }

    fn written_frames(backend: &mock::Backend) -> usize {
        backend.writes().iter().map(|w| w.samples.len()).sum()
    }

    #[test]
    fn test_warning_rendered_to_device() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture(mock::Backend::default(), false)?;
        fixture.engine.dispatcher().on_telemetry(&record(20.0));

        eventually(
            || written_frames(&fixture.backend) == TONE_FRAMES,
            "Warning was never fully rendered",
        );
        let writes = fixture.backend.writes();
        assert_eq!(1, fixture.backend.opened());
        assert_eq!("mock-device", writes[0].device);
        // Preprocessed at 20% (0.1), then played at 50% with unit safe scaling.
        assert!((writes[0].samples[0] - 0.05).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_superseding_request_is_not_starved() -> Result<(), Box<dyn std::error::Error>> {
        // Each chunk takes 1ms, so the first render is still in flight when the stall arrives.
        let backend = mock::Backend::default().with_write_delay(Duration::from_millis(1));
        let fixture = fixture(backend, true)?;
        let dispatcher = fixture.engine.dispatcher();

        dispatcher.on_telemetry(&record(20.0));
        eventually(
            || !fixture.backend.writes().is_empty(),
            "First warning never started",
        );
        dispatcher.on_telemetry(&record(35.0));

        // The stall tone is preprocessed at full volume, so its samples are louder.
        eventually(
            || {
                fixture
                    .backend
                    .writes()
                    .last()
                    .is_some_and(|w| (w.samples[0] - 0.5).abs() < 1e-6)
            },
            "Stall warning never rendered",
        );
        // The superseded warning stopped early.
        let quiet: usize = fixture
            .backend
            .writes()
            .iter()
            .filter(|w| (w.samples[0] - 0.05).abs() < 1e-6)
            .map(|w| w.samples.len())
            .sum();
        assert!(quiet < TONE_FRAMES);
        Ok(())
    }

    #[test]
    fn test_hot_reload_without_dropping_render() -> Result<(), Box<dyn std::error::Error>> {
        let backend = mock::Backend::default().with_write_delay(Duration::from_millis(1));
        let fixture = fixture(backend, false)?;
        let dispatcher = fixture.engine.dispatcher();

        dispatcher.on_telemetry(&record(20.0));
        eventually(
            || !fixture.backend.writes().is_empty(),
            "Warning never started",
        );

        testutil::rewrite_profile(
            &fixture.profiles.path().join("default.cfg"),
            &testutil::DEFAULT_PROFILE.replace("Stall_warning = 30", "Stall_warning = 19"),
            Duration::from_secs(10),
        )?;
        eventually(
            || fixture.engine.store().active_profile().stall_warning == 19.0,
            "Profile was never reloaded",
        );

        // The in-flight render still completes.
        eventually(
            || written_frames(&fixture.backend) >= TONE_FRAMES,
            "In-flight render was dropped",
        );

        let request = dispatcher.on_telemetry(&record(20.0)).ok_or("no request")?;
        assert_eq!(Category::StallWarning, request.category);
        Ok(())
    }

    #[test]
    fn test_missing_buffer_does_not_stop_playback() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = fixture(mock::Backend::default(), false)?;
        std::fs::write(
            fixture.profiles.path().join("F-14B.cfg"),
            testutil::DEFAULT_PROFILE.replace("stall_warning.wav", "missing.wav"),
        )?;

        let dispatcher = fixture.engine.dispatcher();
        // The previous stall buffer is kept, so this still plays.
        dispatcher.on_telemetry(&TelemetryRecord {
            ias: 120.0,
            aoa: 40.0,
            aircraft: Some("F-14B".to_string()),
        });
        eventually(
            || written_frames(&fixture.backend) == TONE_FRAMES,
            "Stall warning never rendered",
        );
        assert!(fixture.engine.bank().buffer(Category::StallWarning).is_some());
        Ok(())
    }

    #[test]
    fn test_shutdown_closes_connections() -> Result<(), Box<dyn std::error::Error>> {
        let mut fixture = fixture(mock::Backend::default(), false)?;
        fixture.engine.dispatcher().on_telemetry(&record(35.0));
        eventually(
            || fixture.backend.opened() == 1,
            "Connection never opened",
        );

        fixture.engine.shutdown();
        assert_eq!(1, fixture.backend.closed());

        // A second shutdown is a no-op.
        fixture.engine.shutdown();
        assert_eq!(1, fixture.backend.closed());
        Ok(())
    }
}
