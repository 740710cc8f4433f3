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
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::{
    AudioOutput, CommandHandler, Engine as EngineTrait, FileKind, FilePlayer, LogLevel, LogSink,
    MidiInput, Router, Settings, Synth,
};

pub mod audio;
pub mod midi_input;
pub mod player;
pub mod router;
pub mod settings;
pub mod shell;
pub mod synth;

/// Holds the currently installed log sink. Engine components report through
/// here; with no sink installed, lines fall through to the process logger.
pub struct SinkCell {
    sink: RwLock<Option<Arc<dyn LogSink>>>,
}

impl SinkCell {
    pub fn new() -> SinkCell {
        SinkCell {
            sink: RwLock::new(None),
        }
    }

    fn set(&self, sink: Option<Arc<dyn LogSink>>) {
        *self.sink.write() = sink;
    }

    /// Reports a log line to the installed sink, or to the process logger
    /// when none is installed.
    pub fn report(&self, level: LogLevel, message: &str) {
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => sink.log(level, message),
            None => match level {
                LogLevel::Error => error!("{}", message),
                LogLevel::Warning => warn!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Debug => debug!("{}", message),
            },
        }
    }
}

/// The built-in software engine backend.
pub struct Engine {
    sink: Arc<SinkCell>,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            sink: Arc::new(SinkCell::new()),
        }
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "software synthesizer engine")
    }
}

impl EngineTrait for Engine {
    fn new_settings(&self) -> Result<Arc<dyn Settings>, Box<dyn Error>> {
        Ok(Arc::new(settings::Store::new()))
    }

    fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("synthshell").join("synthshell.conf"))
    }

    fn system_config_path(&self) -> Option<PathBuf> {
        if cfg!(unix) {
            Some(PathBuf::from("/etc/synthshell.conf"))
        } else {
            None
        }
    }

    fn classify_file(&self, path: &Path) -> FileKind {
        if synth::is_midi_file(path) {
            return FileKind::MidiFile;
        }
        if synth::is_soundfont(path) {
            return FileKind::SoundBank;
        }
        FileKind::Unknown
    }

    fn new_synth(&self, settings: &Arc<dyn Settings>) -> Result<Arc<dyn Synth>, Box<dyn Error>> {
        let sample_rate = settings.get_num("synth.sample-rate").unwrap_or(44100.0);
        let gain = settings.get_num("synth.gain").unwrap_or(0.2);
        Ok(Arc::new(synth::Synth::new(
            sample_rate,
            gain,
            self.sink.clone(),
        )))
    }

    fn new_router(
        &self,
        _settings: &Arc<dyn Settings>,
        synth: &Arc<dyn Synth>,
    ) -> Result<Arc<dyn Router>, Box<dyn Error>> {
        Ok(Arc::new(router::Router::new(
            synth.clone(),
            self.sink.clone(),
        )))
    }

    fn new_midi_input(
        &self,
        settings: &Arc<dyn Settings>,
        router: &Arc<dyn Router>,
    ) -> Result<Box<dyn MidiInput>, Box<dyn Error>> {
        Ok(Box::new(midi_input::Input::new(
            settings,
            router.clone(),
            self.sink.clone(),
        )?))
    }

    fn new_audio_output(
        &self,
        settings: &Arc<dyn Settings>,
        synth: &Arc<dyn Synth>,
    ) -> Result<Box<dyn AudioOutput>, Box<dyn Error>> {
        Ok(Box::new(audio::Output::new(
            settings,
            synth.clone(),
            self.sink.clone(),
        )?))
    }

    fn new_player(
        &self,
        synth: &Arc<dyn Synth>,
        router: Option<&Arc<dyn Router>>,
    ) -> Result<Arc<dyn FilePlayer>, Box<dyn Error>> {
        Ok(Arc::new(player::Player::new(
            synth.clone(),
            router.cloned(),
            self.sink.clone(),
        )))
    }

    fn new_command_handler(
        &self,
        settings: &Arc<dyn Settings>,
        synth: Option<&Arc<dyn Synth>>,
        router: Option<&Arc<dyn Router>>,
        player: Option<&Arc<dyn FilePlayer>>,
    ) -> Result<Box<dyn CommandHandler>, Box<dyn Error>> {
        Ok(Box::new(shell::Shell::new(
            settings.clone(),
            synth.cloned(),
            router.cloned(),
            player.cloned(),
        )))
    }

    fn set_log_sink(&self, sink: Option<Arc<dyn LogSink>>) {
        self.sink.set(sink);
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, io::Write as _, sync::Arc};

    use parking_lot::Mutex;

    use crate::engine::{Engine as _, FileKind, LogLevel, LogSink};

    use super::Engine;

    struct RecordingSink {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for RecordingSink {
        fn log(&self, level: LogLevel, message: &str) {
            self.lines.lock().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_classify_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let engine = Engine::new();

        let midi = dir.path().join("song.mid");
        fs::File::create(&midi)?.write_all(b"MThd\x00\x00\x00\x06\x00\x01\x00\x02")?;
        assert_eq!(FileKind::MidiFile, engine.classify_file(&midi));

        let bank = dir.path().join("bank.sf2");
        fs::File::create(&bank)?.write_all(b"RIFF\x00\x00\x00\x00sfbk")?;
        assert_eq!(FileKind::SoundBank, engine.classify_file(&bank));

        let other = dir.path().join("readme.txt");
        fs::write(&other, "hello")?;
        assert_eq!(FileKind::Unknown, engine.classify_file(&other));

        assert_eq!(
            FileKind::Unknown,
            engine.classify_file(dir.path().join("missing.mid").as_path())
        );
        Ok(())
    }

    #[test]
    fn test_log_sink_install_and_clear() -> Result<(), Box<dyn Error>> {
        let engine = Engine::new();
        let sink = Arc::new(RecordingSink {
            lines: Mutex::new(Vec::new()),
        });

        engine.set_log_sink(Some(sink.clone()));
        engine.sink.report(LogLevel::Warning, "something happened");
        assert_eq!(1, sink.lines.lock().len());

        engine.set_log_sink(None);
        engine.sink.report(LogLevel::Warning, "into the void");
        assert_eq!(1, sink.lines.lock().len());
        Ok(())
    }
}
