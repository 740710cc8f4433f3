// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};

use synthshell::console;
use synthshell::engine::{self, software};
use synthshell::session::{InitOptions, SessionManager};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "An interactive command console for a software synthesizer engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the synthesizer and the interactive console.
    Start {
        /// The audio driver name to use.
        #[arg(short, long)]
        audio_driver: Option<String>,
        /// The MIDI driver name to use.
        #[arg(short, long)]
        midi_driver: Option<String>,
        /// A command configuration file to execute at startup, tried before
        /// the per-user and system-wide locations.
        #[arg(short = 'f', long)]
        config: Option<PathBuf>,
        /// The engine backend to use.
        #[arg(long, default_value = "software")]
        engine: String,
        /// Sound bank and MIDI files to load.
        files: Vec<PathBuf>,
    },
    /// Lists the available audio output devices.
    AudioDrivers {},
    /// Lists the available MIDI input ports.
    MidiPorts {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            audio_driver,
            midi_driver,
            config,
            engine,
            files,
        } => {
            let engine = engine::get(&engine)?;
            let (mut session, events_rx) = SessionManager::new(engine);
            session.init(InitOptions {
                audio_driver,
                midi_driver,
                config_file: config,
                files,
            });
            console::run(session, events_rx).await?;
        }
        Commands::AudioDrivers {} => {
            let devices = software::audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiPorts {} => {
            let ports = software::midi_input::list_ports()?;

            if ports.is_empty() {
                println!("No ports found.");
                return Ok(());
            }

            println!("Ports:");
            for port in ports {
                println!("- {}", port);
            }
        }
    }

    Ok(())
}
