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
mod alerts;
mod audio;
mod config;
mod playsync;
mod telemetry;
#[cfg(test)]
mod testutil;

use std::error::Error;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::alerts::AlertEngine;
use crate::audio::SymphoniaDecoder;
use crate::config::{Settings, WarningProfile};
use crate::telemetry::Listener;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=angle-of-attack and stall warning tones

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/stallhorn
ExecStart=/usr/local/bin/stallhorn start --settings "$STALLHORN_SETTINGS"

[Install]
WantedBy=multi-user.target
Alias=stallhorn.service
"#;

#[derive(Parser)]
#[clap(
    version = crate_version!(),
    about = "Angle-of-attack and stall warning tones driven by flight telemetry."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the output devices along with the index profiles can select them by.
    Devices {
        /// The path to the settings file.
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
    /// Parses a warning profile and reports any invalid fields.
    Check {
        /// The path to the profile.
        profile: PathBuf,
    },
    /// Starts listening for telemetry and sounding warnings.
    Start {
        /// The path to the settings file.
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices { settings } => {
            let settings = Settings::load(settings.as_deref())?;
            let backend = audio::get_backend(settings.output())?;
            let devices = audio::list_devices(backend.as_ref())?;

            if devices.is_empty() {
                println!("No output devices found on {}.", backend.host_name());
                return Ok(());
            }

            println!("Output devices ({}):", backend.host_name());
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Check { profile } => {
            let text = fs::read_to_string(&profile)?;
            let parsed = WarningProfile::parse(&text, &WarningProfile::default());

            println!("{}", parsed.profile);
            if !parsed.profile.thresholds_ordered() {
                println!("Warning: thresholds should satisfy start < end < stall.");
            }
            if parsed.errors.is_empty() {
                println!("{} is valid.", profile.display());
                return Ok(());
            }

            println!("Invalid fields ({}):", parsed.errors.len());
            for error in parsed.errors.iter() {
                println!("- {}", error);
            }
            return Err(format!("{} has invalid fields", profile.display()).into());
        }
        Commands::Start { settings } => {
            let settings = Settings::load(settings.as_deref())?;
            let backend = audio::get_backend(settings.output())?;
            let mut engine = AlertEngine::start(&settings, backend, Arc::new(SymphoniaDecoder))?;

            let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.port()));
            let listener = Listener::bind(addr, engine.dispatcher()).await?;

            let result = tokio::select! {
                result = listener.run() => result,
                signal = tokio::signal::ctrl_c() => {
                    info!("Received interrupt, shutting down");
                    signal
                }
            };

            engine.shutdown();
            if let Err(e) = result {
                error!(err = %e, "Telemetry listener failed");
                return Err(e.into());
            }
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
