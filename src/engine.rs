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
use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use midly::MidiMessage;

pub mod mock;
pub mod software;

/// The kind of file recognized by the engine's format sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A standard MIDI file.
    MidiFile,
    /// A sound bank loadable into the synth core.
    SoundBank,
    /// Anything else.
    Unknown,
}

/// Severity of a log line produced inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "Error"),
            LogLevel::Warning => write!(f, "Warning"),
            LogLevel::Info => write!(f, "Information"),
            LogLevel::Debug => write!(f, "Debug"),
        }
    }
}

/// Receives the engine's internal log lines. Installed by the session at
/// initialization and cleared again at teardown; the engine must never call
/// into a sink after it has been cleared.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// The engine's key/value settings store. Keys are registered by the engine
/// with a fixed type; setting an unregistered key or using the wrong type is
/// an error.
pub trait Settings: Send + Sync {
    fn set_str(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>>;
    fn set_int(&self, key: &str, value: i64) -> Result<(), Box<dyn Error>>;
    fn set_num(&self, key: &str, value: f64) -> Result<(), Box<dyn Error>>;
    fn get_str(&self, key: &str) -> Option<String>;
    fn get_int(&self, key: &str) -> Option<i64>;
    fn get_num(&self, key: &str) -> Option<f64>;

    /// All registered keys, sorted.
    fn keys(&self) -> Vec<String>;
}

/// The active synthesis core.
pub trait Synth: Send + Sync {
    /// Loads a sound bank into the synth, returning its bank id.
    fn load_bank(&self, path: &Path) -> Result<u32, Box<dyn Error>>;

    /// The number of banks currently loaded.
    fn bank_count(&self) -> usize;

    /// The loaded banks in load order.
    fn banks(&self) -> Vec<(u32, PathBuf)>;

    /// Handles a channel MIDI event.
    fn handle_event(&self, channel: u8, message: MidiMessage);

    /// Renders interleaved f32 samples into the given buffer.
    fn render(&self, out: &mut [f32], channels: u16);

    fn set_gain(&self, gain: f32);
    fn gain(&self) -> f32;
}

/// Routes MIDI events into the synth. File playback and hardware MIDI input
/// share this one event path.
pub trait Router: Send + Sync {
    /// Routes a raw MIDI byte message.
    fn route_raw(&self, raw: &[u8]);

    /// Routes an already-decoded channel event.
    fn route_event(&self, channel: u8, message: MidiMessage);
}

/// A hardware MIDI input connection. Dropping the handle disconnects.
pub trait MidiInput: Send + Sync {
    fn port_name(&self) -> String;
}

/// An active audio output stream. Dropping the handle stops output.
pub trait AudioOutput: Send + Sync {
    fn driver_name(&self) -> String;
}

/// Playback state of a file player as the engine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// Created, possibly with queued files, not yet started.
    Ready,
    /// The playback thread is running.
    Playing,
    /// The playback thread has finished or been joined.
    Done,
}

/// A MIDI file player. Files are queued before playback starts; the player
/// is never appended to once it is playing.
pub trait FilePlayer: Send + Sync {
    /// Queues a MIDI file. Fails if the file cannot be parsed or if playback
    /// has already started.
    fn add(&self, path: &Path) -> Result<(), Box<dyn Error>>;

    /// Starts playback of the queued files on a background thread.
    fn play(&self) -> Result<(), Box<dyn Error>>;

    /// Requests playback stop. Non-blocking.
    fn stop(&self);

    /// Blocks until the playback thread has finished.
    fn join(&self);

    fn status(&self) -> PlayerStatus;

    /// The number of queued files.
    fn queued(&self) -> usize;
}

/// The engine's text command interpreter. Commands write their output to the
/// given sink and return an integer status: zero for success, negative for
/// failure.
pub trait CommandHandler: Send + Sync {
    fn run_command(&self, line: &str, out: &mut dyn io::Write) -> i32;

    /// Executes a file of newline-separated commands, returning the status
    /// of the last failing command, or zero if all succeeded.
    fn source(&self, path: &Path, out: &mut dyn io::Write) -> i32;
}

/// An engine backend: the capability bundle the session manager drives. All
/// construction goes through here so the session's logic can be exercised
/// against a fake.
pub trait Engine: fmt::Display + Send + Sync {
    fn new_settings(&self) -> Result<Arc<dyn Settings>, Box<dyn Error>>;

    /// The engine's per-user configuration file location, if the platform
    /// defines one. The file need not exist.
    fn user_config_path(&self) -> Option<PathBuf>;

    /// The engine's system-wide configuration file location.
    fn system_config_path(&self) -> Option<PathBuf>;

    /// Classifies a file by content sniffing.
    fn classify_file(&self, path: &Path) -> FileKind;

    fn new_synth(&self, settings: &Arc<dyn Settings>) -> Result<Arc<dyn Synth>, Box<dyn Error>>;

    fn new_router(
        &self,
        settings: &Arc<dyn Settings>,
        synth: &Arc<dyn Synth>,
    ) -> Result<Arc<dyn Router>, Box<dyn Error>>;

    fn new_midi_input(
        &self,
        settings: &Arc<dyn Settings>,
        router: &Arc<dyn Router>,
    ) -> Result<Box<dyn MidiInput>, Box<dyn Error>>;

    fn new_audio_output(
        &self,
        settings: &Arc<dyn Settings>,
        synth: &Arc<dyn Synth>,
    ) -> Result<Box<dyn AudioOutput>, Box<dyn Error>>;

    /// Creates a file player. When a router is given, played events go
    /// through it so file playback and MIDI input share one event path.
    fn new_player(
        &self,
        synth: &Arc<dyn Synth>,
        router: Option<&Arc<dyn Router>>,
    ) -> Result<Arc<dyn FilePlayer>, Box<dyn Error>>;

    /// Creates a command interpreter bound to the given handles. Commands
    /// that need an unbound handle fail at dispatch time.
    fn new_command_handler(
        &self,
        settings: &Arc<dyn Settings>,
        synth: Option<&Arc<dyn Synth>>,
        router: Option<&Arc<dyn Router>>,
        player: Option<&Arc<dyn FilePlayer>>,
    ) -> Result<Box<dyn CommandHandler>, Box<dyn Error>>;

    /// Installs or clears the log sink. With no sink installed, log lines
    /// fall through to the process logger.
    fn set_log_sink(&self, sink: Option<Arc<dyn LogSink>>);
}

/// Gets an engine backend with the given name.
pub fn get(name: &str) -> Result<Arc<dyn Engine>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Engine::get(name)));
    };

    match name {
        "software" | "default" => Ok(Arc::new(software::Engine::new())),
        _ => Err(format!("no engine backend with name {}", name).into()),
    }
}
