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
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, span, warn, Level, Span};

use crate::{
    bridge::Bridge,
    config,
    diag::DiagnosticRelay,
    engine::{
        AudioOutput, CommandHandler, Engine, FileKind, LogLevel, MidiInput, Router, Settings,
        Synth,
    },
    player::{MidiPlayer, PlayerState},
};

/// The prompt used when the settings store has none.
pub const DEFAULT_PROMPT: &str = "> ";

/// Events the session delivers to its caller. The caller's only channel for
/// results and failures; fatal initialization failures additionally show up
/// as absent resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Initialization finished and the console may accept input. Delivered
    /// through the event channel, so it arrives only after `init` returns.
    Initialized,
    /// A log line produced inside the engine or by the session itself.
    Diagnostics { level: LogLevel, message: String },
    /// Output of the most recent command, with its status code. Large
    /// output arrives as several of these.
    DataRead { data: Vec<u8>, status: i32 },
    /// A MIDI file batch was queued and playback started.
    MidiPlayerActive,
}

/// What the caller hands to `init`.
#[derive(Debug, Default, Clone)]
pub struct InitOptions {
    /// Audio driver name to store into the settings. Empty or absent means
    /// keep the engine default.
    pub audio_driver: Option<String>,
    /// MIDI driver name to store into the settings.
    pub midi_driver: Option<String>,
    /// Explicit configuration file path, tried before the discovered ones.
    pub config_file: Option<PathBuf>,
    /// Sound bank and MIDI files to load, classified by the engine.
    pub files: Vec<PathBuf>,
}

/// Owns the engine's resources for one session: builds them in a fixed
/// order, applies configuration, loads caller-supplied files, manages the
/// MIDI player lifecycle, and executes commands against the bridge.
///
/// Commands are accepted one at a time; the caller is expected to hold
/// further input until the corresponding `DataRead` arrives.
pub struct SessionManager {
    engine: Arc<dyn Engine>,
    events_tx: UnboundedSender<SessionEvent>,
    bridge: Bridge,
    settings: Option<Arc<dyn Settings>>,
    synth: Option<Arc<dyn Synth>>,
    router: Option<Arc<dyn Router>>,
    midi_input: Option<Box<dyn MidiInput>>,
    player: Option<MidiPlayer>,
    interpreter: Option<Box<dyn CommandHandler>>,
    audio_output: Option<Box<dyn AudioOutput>>,
    span: Span,
}

impl SessionManager {
    /// Creates the session and its event channel. The bridge is created
    /// once here and lives for the whole session. Must be called from
    /// within a tokio runtime.
    pub fn new(engine: Arc<dyn Engine>) -> (SessionManager, UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::new(events_tx.clone());
        (
            SessionManager {
                engine,
                events_tx,
                bridge,
                settings: None,
                synth: None,
                router: None,
                midi_input: None,
                player: None,
                interpreter: None,
                audio_output: None,
                span: span!(Level::INFO, "session"),
            },
            events_rx,
        )
    }

    /// Initializes the session. Failures are reported through diagnostics
    /// events, never returned; after a fatal failure the session is left
    /// partially constructed and non-functional, and the caller is expected
    /// to invoke [`SessionManager::teardown`] as usual.
    pub fn init(&mut self, opts: InitOptions) {
        let span = self.span.clone();
        let _enter = span.enter();

        // Route the engine's log output to the caller for the lifetime of
        // the session.
        self.engine
            .set_log_sink(Some(Arc::new(DiagnosticRelay::new(self.events_tx.clone()))));

        let settings = match self.engine.new_settings() {
            Ok(settings) => settings,
            Err(e) => {
                self.error_diag(format!("Failed to create the engine settings: {}", e));
                return;
            }
        };
        let _ = settings.set_int("midi.autoconnect", 1);
        let _ = settings.set_str("shell.prompt", DEFAULT_PROMPT);
        self.settings = Some(settings.clone());

        // Execute the resolved configuration file through a transient
        // interpreter bound only to the settings. Failures are warnings.
        if let Some(config_path) =
            config::resolve_config_file(self.engine.as_ref(), opts.config_file.as_deref())
        {
            match self.engine.new_command_handler(&settings, None, None, None) {
                Ok(handler) => {
                    if handler.source(&config_path, &mut io::sink()) < 0 {
                        self.warn_diag(format!(
                            "Failed to execute command configuration file {}",
                            config_path.display()
                        ));
                    }
                }
                Err(e) => self.warn_diag(format!(
                    "Failed to create the command handler for {}: {}",
                    config_path.display(),
                    e
                )),
            }
        }

        // Driver name stores are the two settings whose failure is
        // unrecoverable.
        for (key, value) in [
            ("audio.driver", &opts.audio_driver),
            ("midi.driver", &opts.midi_driver),
        ] {
            let value = match value {
                Some(value) if !value.is_empty() => value,
                _ => continue,
            };
            if let Err(e) = settings.set_str(key, value) {
                self.error_diag(format!("Failed to set {} to {}: {}", key, value, e));
                return;
            }
        }

        let synth = match self.engine.new_synth(&settings) {
            Ok(synth) => synth,
            Err(e) => {
                self.error_diag(format!("Failed to create the synthesizer: {}", e));
                return;
            }
        };
        self.synth = Some(synth.clone());

        // Sound banks load immediately; MIDI files wait for the player.
        let mut midi_files: Vec<PathBuf> = Vec::new();
        for path in opts.files.iter() {
            match self.engine.classify_file(path) {
                FileKind::MidiFile => midi_files.push(path.clone()),
                FileKind::SoundBank => {
                    if let Err(e) = synth.load_bank(path) {
                        self.warn_diag(format!(
                            "Failed to load the sound bank {}: {}",
                            path.display(),
                            e
                        ));
                    }
                }
                FileKind::Unknown => self.warn_diag(format!(
                    "Parameter {} is not a sound bank or MIDI file or error occurred identifying it",
                    path.display()
                )),
            }
        }

        // Try to load the default sound bank if none was loaded. Its
        // failure is expected and stays quiet.
        if synth.bank_count() == 0 {
            if let Some(default_bank) = settings.get_str("synth.default-soundfont") {
                if !default_bank.is_empty() {
                    let _ = synth.load_bank(Path::new(&default_bank));
                }
            }
        }

        let router = match self.engine.new_router(&settings, &synth) {
            Ok(router) => {
                self.router = Some(router.clone());
                Some(router)
            }
            Err(e) => {
                self.warn_diag(format!(
                    "Failed to create the MIDI router; no MIDI input will be available. \
                     You can access the synthesizer through the console: {}",
                    e
                ));
                None
            }
        };

        if let Some(router) = router.as_ref() {
            match self.engine.new_midi_input(&settings, router) {
                Ok(input) => self.midi_input = Some(input),
                Err(e) => self.warn_diag(format!(
                    "Failed to create the MIDI input driver; no MIDI input will be available. \
                     You can access the synthesizer through the console: {}",
                    e
                )),
            }
        }

        if !midi_files.is_empty() {
            self.build_and_start_player(&synth, router.as_ref(), &midi_files);
        }

        let player_handle = self.player.as_ref().map(|player| player.handle());
        match self.engine.new_command_handler(
            &settings,
            Some(&synth),
            router.as_ref(),
            player_handle.as_ref(),
        ) {
            Ok(handler) => self.interpreter = Some(handler),
            Err(e) => {
                self.error_diag(format!("Failed to create the command handler: {}", e));
                return;
            }
        }

        match self.engine.new_audio_output(&settings, &synth) {
            Ok(output) => self.audio_output = Some(output),
            Err(e) => {
                // Fatal, but everything built so far stays allocated until
                // the caller tears the session down.
                self.error_diag(format!("Failed to create the audio driver. Giving up: {}", e));
                return;
            }
        }

        info!("Session initialized.");

        // Delivery through the event channel defers this past the return,
        // giving audio startup room to settle before input arrives.
        let _ = self.events_tx.send(SessionEvent::Initialized);
    }

    /// Executes a command line against the interpreter, blocking for the
    /// duration of dispatch. Output arrives later as `DataRead` events.
    /// Empty input never reaches the interpreter.
    pub fn command(&mut self, text: &str) {
        let _enter = self.span.enter();

        if text.is_empty() || text == "\n" {
            return;
        }
        let interpreter = match self.interpreter.as_ref() {
            Some(interpreter) => interpreter,
            None => return,
        };

        let mut writer = self.bridge.writer();
        let status = interpreter.run_command(text, &mut writer);
        self.bridge.finish_command(status);
    }

    /// Replaces the current MIDI file batch. The old player is always fully
    /// stopped, joined, and destroyed before the new batch is queued; an
    /// empty batch is a silent no-op. The interpreter is rebuilt around the
    /// new player.
    pub fn load_midi_files(&mut self, paths: &[PathBuf]) {
        let span = self.span.clone();
        let _enter = span.enter();

        if paths.is_empty() {
            return;
        }

        let (settings, synth) = match (self.settings.as_ref(), self.synth.as_ref()) {
            (Some(settings), Some(synth)) => (settings.clone(), synth.clone()),
            _ => {
                self.warn_diag(
                    "Cannot load MIDI files without an active synthesizer".to_string(),
                );
                return;
            }
        };

        // The interpreter is bound to the old player; drop it before the
        // player goes away.
        self.interpreter = None;

        if let Some(player) = self.player.as_mut() {
            player.stop_and_join();
            if player.is_done() {
                self.player = None;
            } else {
                self.warn_diag(
                    "The MIDI player did not reach a stopped state; keeping the old batch"
                        .to_string(),
                );
                return;
            }
        }

        let router = self.router.clone();
        self.build_and_start_player(&synth, router.as_ref(), paths);

        let player_handle = self.player.as_ref().map(|player| player.handle());
        match self.engine.new_command_handler(
            &settings,
            Some(&synth),
            router.as_ref(),
            player_handle.as_ref(),
        ) {
            Ok(handler) => self.interpreter = Some(handler),
            Err(e) => self.error_diag(format!("Failed to create the command handler: {}", e)),
        }
    }

    /// The shell prompt, falling back to a fixed default when the settings
    /// store has none.
    pub fn prompt(&self) -> String {
        self.settings
            .as_ref()
            .and_then(|settings| settings.get_str("shell.prompt"))
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string())
    }

    /// Tears the session down. Runs fully no matter how far initialization
    /// got; every step tolerates its target being absent. Safe to call more
    /// than once.
    pub fn teardown(&mut self) {
        let _enter = self.span.enter();

        // Clear the log sink first so the engine can never call into a
        // session that is being destroyed.
        self.engine.set_log_sink(None);

        self.interpreter = None;

        if let Some(mut player) = self.player.take() {
            player.stop_and_join();
            if player.is_done() {
                drop(player);
            } else {
                // Never destroy a player that is still winding down; put it
                // back for a later teardown attempt.
                warn!("The MIDI player did not reach a stopped state.");
                self.player = Some(player);
            }
        }

        // Reverse of creation order.
        self.audio_output = None;
        self.midi_input = None;
        self.router = None;
        self.synth = None;
        self.settings = None;
    }

    /// True when the session came up with a working interpreter and audio
    /// output. This is the caller's fatal-failure signal.
    pub fn is_functional(&self) -> bool {
        self.interpreter.is_some() && self.audio_output.is_some()
    }

    pub fn has_synth(&self) -> bool {
        self.synth.is_some()
    }

    pub fn has_settings(&self) -> bool {
        self.settings.is_some()
    }

    pub fn has_router(&self) -> bool {
        self.router.is_some()
    }

    pub fn has_midi_input(&self) -> bool {
        self.midi_input.is_some()
    }

    pub fn has_audio_output(&self) -> bool {
        self.audio_output.is_some()
    }

    pub fn player_state(&self) -> Option<PlayerState> {
        self.player.as_ref().map(|player| player.state())
    }

    fn build_and_start_player(
        &mut self,
        synth: &Arc<dyn Synth>,
        router: Option<&Arc<dyn Router>>,
        files: &[PathBuf],
    ) {
        let mut player = match MidiPlayer::new(self.engine.as_ref(), synth, router) {
            Ok(player) => player,
            Err(e) => {
                self.warn_diag(format!(
                    "Failed to create the midifile player. Continuing without a player: {}",
                    e
                ));
                return;
            }
        };

        for path in files {
            if let Err(e) = player.queue(path) {
                self.warn_diag(format!(
                    "Failed to queue the MIDI file {}: {}",
                    path.display(),
                    e
                ));
            }
        }

        if player.queued() > 0 {
            match player.start() {
                Ok(()) => {
                    let _ = self.events_tx.send(SessionEvent::MidiPlayerActive);
                }
                Err(e) => self.warn_diag(format!("Failed to start MIDI playback: {}", e)),
            }
        }

        self.player = Some(player);
    }

    fn warn_diag(&self, message: String) {
        warn!("{}", message);
        let _ = self.events_tx.send(SessionEvent::Diagnostics {
            level: LogLevel::Warning,
            message,
        });
    }

    fn error_diag(&self, message: String) {
        error!("{}", message);
        let _ = self.events_tx.send(SessionEvent::Diagnostics {
            level: LogLevel::Error,
            message,
        });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
