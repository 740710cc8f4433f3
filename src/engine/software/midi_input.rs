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
use std::{error::Error, sync::Arc};

use midir::{MidiInput as MidirInput, MidiInputConnection};
use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{LogLevel, MidiInput as MidiInputTrait, Router, Settings};

use super::SinkCell;

const CLIENT_NAME: &str = "synthshell input";

/// A hardware MIDI input connection feeding the router. Dropping the driver
/// disconnects the port.
pub struct Input {
    port_name: String,
    // Held only so the connection stays alive for the driver's lifetime.
    connection: Mutex<Option<MidiInputConnection<()>>>,
}

impl Input {
    /// Connects to a MIDI input port. The port is chosen by substring match
    /// against `midi.portname` when set; otherwise the first available port
    /// is used when `midi.autoconnect` is enabled.
    pub fn new(
        settings: &Arc<dyn Settings>,
        router: Arc<dyn Router>,
        sink: Arc<SinkCell>,
    ) -> Result<Input, Box<dyn Error>> {
        let driver = settings
            .get_str("midi.driver")
            .unwrap_or_else(|| "midir".to_string());
        if driver != "midir" && driver != "default" {
            return Err(format!("unknown MIDI driver {}", driver).into());
        }

        let input = MidirInput::new(CLIENT_NAME)?;
        let ports = input.ports();
        if ports.is_empty() {
            return Err("no MIDI input ports available".into());
        }

        let wanted = settings.get_str("midi.portname").unwrap_or_default();
        let autoconnect = settings.get_int("midi.autoconnect").unwrap_or(0) != 0;

        let port = if !wanted.is_empty() {
            ports
                .iter()
                .find(|port| {
                    input
                        .port_name(port)
                        .map(|name| name.contains(&wanted))
                        .unwrap_or(false)
                })
                .ok_or_else(|| format!("no MIDI input port matching {}", wanted))?
        } else if autoconnect {
            &ports[0]
        } else {
            return Err("no MIDI port configured and autoconnect is disabled".into());
        };

        let port_name = input.port_name(port)?;
        let connection = input.connect(
            port,
            "synthshell port",
            move |_, raw, _| {
                debug!(len = raw.len(), "Received MIDI input.");
                router.route_raw(raw);
            },
            (),
        )?;

        sink.report(
            LogLevel::Info,
            &format!("MIDI input connected to {}", port_name),
        );

        Ok(Input {
            port_name,
            connection: Mutex::new(Some(connection)),
        })
    }
}

impl MidiInputTrait for Input {
    fn port_name(&self) -> String {
        self.port_name.clone()
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        // Explicitly drop the connection to disconnect the port.
        let connection = self.connection.lock().take();
        drop(connection);
    }
}

/// Lists the available MIDI input port names.
pub fn list_ports() -> Result<Vec<String>, Box<dyn Error>> {
    let input = MidirInput::new("synthshell port listing")?;
    let mut names = Vec::new();
    for port in input.ports() {
        names.push(input.port_name(&port)?);
    }
    names.sort();
    Ok(names)
}
