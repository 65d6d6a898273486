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

//! Telemetry ingestion. The simulator export script sends one datagram per frame in the
//! form `IAS,AoA[,aircraftId]`.

use std::{io, net::SocketAddr, time::Duration};

use tokio::net::UdpSocket;
use tracing::{debug, info, span, warn, Instrument, Level};

use crate::alerts::Dispatcher;

/// Datagrams larger than this are truncated.
const MAX_DATAGRAM_SIZE: usize = 1024;

/// The first wait after a receive error. Each further error in a row doubles it.
const RECEIVE_BACKOFF_MIN: Duration = Duration::from_millis(10);

const RECEIVE_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// The listener gives up after this many receive errors in a row.
const MAX_RECEIVE_ERRORS: u32 = 20;

/// A single telemetry sample.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    /// Indicated airspeed.
    pub ias: f32,
    /// Angle of attack.
    pub aoa: f32,
    pub aircraft: Option<String>,
}

impl TelemetryRecord {
    /// Parses a datagram. Numeric fields that are missing or malformed read as 0.0, which
    /// keeps the engine silent rather than dropping the sample; a blank aircraft id is
    /// treated as absent.
    pub fn parse(text: &str) -> TelemetryRecord {
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        let mut fields = text.splitn(3, ',');

        let ias = parse_number("ias", fields.next());
        let aoa = parse_number("aoa", fields.next());
        let aircraft = fields
            .next()
            .map(str::trim)
            .filter(|aircraft| !aircraft.is_empty())
            .map(str::to_string);

        TelemetryRecord { ias, aoa, aircraft }
    }
}

fn parse_number(field: &str, value: Option<&str>) -> f32 {
    let value = value.map(str::trim).unwrap_or_default();
    match value.parse::<f32>() {
        Ok(parsed) if parsed.is_finite() => parsed,
        _ => {
            warn!(field, value, "Malformed telemetry field, using 0.0");
            0.0
        }
    }
}

/// Tracks receive errors in a row. Isolated errors (an ICMP port unreachable surfacing as a
/// connection reset on Windows, say) are waited out; a socket that keeps failing ends the
/// listener.
#[derive(Debug, Default)]
struct ReceiveBackoff {
    consecutive: u32,
}

impl ReceiveBackoff {
    /// Records an error, returning how long to wait before receiving again, or the error if
    /// there have been too many in a row.
    fn failed(&mut self, err: io::Error) -> io::Result<Duration> {
        self.consecutive += 1;
        if self.consecutive >= MAX_RECEIVE_ERRORS {
            return Err(err);
        }
        let doublings = (self.consecutive - 1).min(16);
        Ok(RECEIVE_BACKOFF_MIN
            .saturating_mul(1 << doublings)
            .min(RECEIVE_BACKOFF_MAX))
    }

    fn succeeded(&mut self) {
        self.consecutive = 0;
    }
}

/// Receives telemetry datagrams and hands them to the dispatcher.
pub struct Listener {
    socket: UdpSocket,
    dispatcher: Dispatcher,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, dispatcher: Dispatcher) -> io::Result<Listener> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Listener { socket, dispatcher })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receives datagrams forever. Must run on a multi-threaded runtime, since aircraft
    /// switches reload profiles and decode assets on this task.
    pub async fn run(self) -> io::Result<()> {
        self.receive()
            .instrument(span!(Level::INFO, "telemetry"))
            .await
    }

    async fn receive(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Listening for telemetry");

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut backoff = ReceiveBackoff::default();
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => {
                    backoff.succeeded();
                    received
                }
                Err(e) => {
                    warn!(err = %e, errors = backoff.consecutive + 1, "Error receiving telemetry");
                    let delay = backoff.failed(e)?;
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..len]);
            let record = TelemetryRecord::parse(&text);
            debug!(%peer, ias = record.ias, aoa = record.aoa, "Telemetry received");

            tokio::task::block_in_place(|| self.dispatcher.on_telemetry(&record));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, sync::Arc, time::Duration};

    use tokio::net::UdpSocket;

    use super::*;
    use crate::{
        alerts::{BufferBank, Category, PendingSlot},
        audio::{mock, SymphoniaDecoder},
        config::ConfigurationStore,
        testutil,
    };

    #[test]
    fn test_receive_backoff() {
        let error = || io::Error::from(io::ErrorKind::ConnectionReset);
        let mut backoff = ReceiveBackoff::default();

        assert_eq!(Duration::from_millis(10), backoff.failed(error()).unwrap());
        assert_eq!(Duration::from_millis(20), backoff.failed(error()).unwrap());
        assert_eq!(Duration::from_millis(40), backoff.failed(error()).unwrap());

        // A good datagram starts over.
        backoff.succeeded();
        assert_eq!(Duration::from_millis(10), backoff.failed(error()).unwrap());

        for _ in 2..MAX_RECEIVE_ERRORS {
            let delay = backoff.failed(error()).unwrap();
            assert!(delay <= Duration::from_secs(1));
        }
        let err = backoff.failed(error()).unwrap_err();
        assert_eq!(io::ErrorKind::ConnectionReset, err.kind());
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            TelemetryRecord {
                ias: 250.5,
                aoa: 12.25,
                aircraft: Some("F-16C_50".to_string()),
            },
            TelemetryRecord::parse("250.5,12.25,F-16C_50\n")
        );
        assert_eq!(
            TelemetryRecord {
                ias: 100.0,
                aoa: 3.0,
                aircraft: None,
            },
            TelemetryRecord::parse("100,3")
        );
    }

    #[test]
    fn test_parse_blank_aircraft_is_absent() {
        assert_eq!(None, TelemetryRecord::parse("100,3,   ").aircraft);
        assert_eq!(None, TelemetryRecord::parse("100,3,").aircraft);
    }

    #[test]
    fn test_parse_malformed_numbers_read_as_zero() {
        let record = TelemetryRecord::parse("fast,,A-10C");
        assert_eq!(0.0, record.ias);
        assert_eq!(0.0, record.aoa);
        assert_eq!(Some("A-10C".to_string()), record.aircraft);

        let record = TelemetryRecord::parse("");
        assert_eq!(0.0, record.ias);
        assert_eq!(0.0, record.aoa);
        assert_eq!(None, record.aircraft);

        assert_eq!(0.0, TelemetryRecord::parse("1,inf").aoa);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_listener_dispatches_datagrams() -> Result<(), Box<dyn Error>> {
        let profiles = testutil::profiles_dir(testutil::DEFAULT_PROFILE)?;
        let assets = testutil::asset_root(64, 1, 0.5)?;
        let store = Arc::new(ConfigurationStore::open(
            profiles.path(),
            Arc::new(mock::Backend::default()),
            None,
        )?);
        let bank = Arc::new(BufferBank::new(Arc::new(SymphoniaDecoder), assets.path()));
        bank.refresh(&store);
        let slot = Arc::new(PendingSlot::new());
        let dispatcher = Dispatcher::new(store.clone(), bank, slot.clone());

        let listener = Listener::bind("127.0.0.1:0".parse()?, dispatcher).await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(listener.run());

        let client = UdpSocket::bind("127.0.0.1:0").await?;
        client.send_to(b"210.0,31.5,F-15C", addr).await?;

        let mut pending = None;
        for _ in 0..300 {
            pending = slot.pending();
            if pending.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let pending = pending.ok_or("telemetry never dispatched")?;
        assert_eq!(Category::StallWarning, pending.category);
        assert_eq!(Some("F-15C".to_string()), store.active_aircraft());

        task.abort();
        Ok(())
    }
}
