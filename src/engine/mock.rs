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
    collections::{HashMap, HashSet},
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread,
    time::Duration,
};

use midly::MidiMessage;
use parking_lot::Mutex;

use super::{
    AudioOutput, CommandHandler, Engine as EngineTrait, FileKind, FilePlayer, LogLevel, LogSink,
    MidiInput, PlayerStatus, Router, Settings, Synth,
};

/// A call log shared between the mock engine and every handle it creates.
/// Construction, mutation, and drop events are appended in order so tests
/// can assert lifecycle sequencing.
type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct Failures {
    synth: AtomicBool,
    router: AtomicBool,
    midi_input: AtomicBool,
    audio_output: AtomicBool,
    player: AtomicBool,
    command_handler: AtomicBool,
    set_keys: Mutex<HashSet<String>>,
    banks: Mutex<HashSet<PathBuf>>,
    player_files: Mutex<HashSet<PathBuf>>,
}

/// A mock engine backend. Doesn't make any sound; records everything.
pub struct Engine {
    name: String,
    calls: CallLog,
    sink: Mutex<Option<Arc<dyn LogSink>>>,
    failures: Failures,
    initial_settings: Mutex<HashMap<String, String>>,
    responses: Mutex<HashMap<String, (String, i32)>>,
    user_conf: Mutex<Option<PathBuf>>,
    system_conf: Mutex<Option<PathBuf>>,
    // Weak so the engine's bookkeeping never keeps a player alive.
    players: Mutex<Vec<Weak<Player>>>,
    next_player_id: AtomicUsize,
}

impl Engine {
    /// Gets the given mock engine.
    pub fn get(name: &str) -> Engine {
        Engine {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            sink: Mutex::new(None),
            failures: Failures::default(),
            initial_settings: Mutex::new(HashMap::new()),
            responses: Mutex::new(HashMap::new()),
            user_conf: Mutex::new(None),
            system_conf: Mutex::new(None),
            players: Mutex::new(Vec::new()),
            next_player_id: AtomicUsize::new(0),
        }
    }

    /// Sends a log line through the installed sink, as engine internals
    /// would.
    pub fn emit_log(&self, level: LogLevel, message: &str) {
        if let Some(sink) = self.sink.lock().clone() {
            sink.log(level, message);
        }
    }

    #[cfg(test)]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    #[cfg(test)]
    pub fn has_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    #[cfg(test)]
    pub fn fail_synth(&self) {
        self.failures.synth.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn fail_router(&self) {
        self.failures.router.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn fail_midi_input(&self) {
        self.failures.midi_input.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn fail_audio_output(&self) {
        self.failures.audio_output.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn fail_player(&self) {
        self.failures.player.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn fail_command_handler(&self) {
        self.failures.command_handler.store(true, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn fail_set_key(&self, key: &str) {
        self.failures.set_keys.lock().insert(key.to_string());
    }

    #[cfg(test)]
    pub fn fail_bank(&self, path: &Path) {
        self.failures.banks.lock().insert(path.to_path_buf());
    }

    #[cfg(test)]
    pub fn fail_player_file(&self, path: &Path) {
        self.failures.player_files.lock().insert(path.to_path_buf());
    }

    #[cfg(test)]
    pub fn set_initial_setting(&self, key: &str, value: &str) {
        self.initial_settings
            .lock()
            .insert(key.to_string(), value.to_string());
    }

    /// Scripts the output and status of a command.
    #[cfg(test)]
    pub fn script_command(&self, command: &str, output: &str, status: i32) {
        self.responses
            .lock()
            .insert(command.to_string(), (output.to_string(), status));
    }

    #[cfg(test)]
    pub fn set_user_config_path(&self, path: Option<PathBuf>) {
        *self.user_conf.lock() = path;
    }

    #[cfg(test)]
    pub fn set_system_config_path(&self, path: Option<PathBuf>) {
        *self.system_conf.lock() = path;
    }

    /// The still-living players, in creation order.
    #[cfg(test)]
    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players
            .lock()
            .iter()
            .filter_map(|player| player.upgrade())
            .collect()
    }
}

impl EngineTrait for Engine {
    fn new_settings(&self) -> Result<Arc<dyn Settings>, Box<dyn Error>> {
        self.calls.lock().push("settings".to_string());
        let mut store: HashMap<String, String> = HashMap::new();
        for (key, value) in self.initial_settings.lock().iter() {
            store.insert(key.clone(), value.clone());
        }
        Ok(Arc::new(Store {
            calls: self.calls.clone(),
            values: Mutex::new(store),
            fail_keys: self.failures.set_keys.lock().clone(),
        }))
    }

    fn user_config_path(&self) -> Option<PathBuf> {
        self.user_conf.lock().clone()
    }

    fn system_config_path(&self) -> Option<PathBuf> {
        self.system_conf.lock().clone()
    }

    /// The mock classifies by extension rather than content.
    fn classify_file(&self, path: &Path) -> FileKind {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("mid") | Some("midi") => FileKind::MidiFile,
            Some("sf2") | Some("sf3") => FileKind::SoundBank,
            _ => FileKind::Unknown,
        }
    }

    fn new_synth(&self, _settings: &Arc<dyn Settings>) -> Result<Arc<dyn Synth>, Box<dyn Error>> {
        if self.failures.synth.load(Ordering::Relaxed) {
            return Err("mock synth creation failure".into());
        }
        self.calls.lock().push("synth".to_string());
        Ok(Arc::new(MockSynth {
            calls: self.calls.clone(),
            banks: Mutex::new(Vec::new()),
            fail_banks: self.failures.banks.lock().clone(),
            next_bank_id: AtomicUsize::new(0),
        }))
    }

    fn new_router(
        &self,
        _settings: &Arc<dyn Settings>,
        _synth: &Arc<dyn Synth>,
    ) -> Result<Arc<dyn Router>, Box<dyn Error>> {
        if self.failures.router.load(Ordering::Relaxed) {
            return Err("mock router creation failure".into());
        }
        self.calls.lock().push("router".to_string());
        Ok(Arc::new(MockRouter {
            calls: self.calls.clone(),
        }))
    }

    fn new_midi_input(
        &self,
        _settings: &Arc<dyn Settings>,
        _router: &Arc<dyn Router>,
    ) -> Result<Box<dyn MidiInput>, Box<dyn Error>> {
        if self.failures.midi_input.load(Ordering::Relaxed) {
            return Err("mock MIDI input creation failure".into());
        }
        self.calls.lock().push("midi_input".to_string());
        Ok(Box::new(MockMidiInput {
            calls: self.calls.clone(),
        }))
    }

    fn new_audio_output(
        &self,
        _settings: &Arc<dyn Settings>,
        _synth: &Arc<dyn Synth>,
    ) -> Result<Box<dyn AudioOutput>, Box<dyn Error>> {
        if self.failures.audio_output.load(Ordering::Relaxed) {
            return Err("mock audio output creation failure".into());
        }
        self.calls.lock().push("audio_output".to_string());
        Ok(Box::new(MockAudioOutput {
            calls: self.calls.clone(),
        }))
    }

    fn new_player(
        &self,
        _synth: &Arc<dyn Synth>,
        router: Option<&Arc<dyn Router>>,
    ) -> Result<Arc<dyn FilePlayer>, Box<dyn Error>> {
        if self.failures.player.load(Ordering::Relaxed) {
            return Err("mock player creation failure".into());
        }
        let id = self.next_player_id.fetch_add(1, Ordering::Relaxed);
        self.calls
            .lock()
            .push(format!("player#{} router={}", id, router.is_some()));
        let player = Arc::new(Player {
            id,
            calls: self.calls.clone(),
            queued: Mutex::new(Vec::new()),
            fail_files: self.failures.player_files.lock().clone(),
            started: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        });
        self.players.lock().push(Arc::downgrade(&player));
        Ok(player)
    }

    fn new_command_handler(
        &self,
        _settings: &Arc<dyn Settings>,
        synth: Option<&Arc<dyn Synth>>,
        router: Option<&Arc<dyn Router>>,
        player: Option<&Arc<dyn FilePlayer>>,
    ) -> Result<Box<dyn CommandHandler>, Box<dyn Error>> {
        if self.failures.command_handler.load(Ordering::Relaxed) {
            return Err("mock command handler creation failure".into());
        }
        self.calls.lock().push(format!(
            "command_handler synth={} router={} player={}",
            synth.is_some(),
            router.is_some(),
            player.is_some()
        ));
        Ok(Box::new(MockCommandHandler {
            calls: self.calls.clone(),
            responses: self.responses.lock().clone(),
        }))
    }

    fn set_log_sink(&self, sink: Option<Arc<dyn LogSink>>) {
        self.calls.lock().push(
            if sink.is_some() {
                "log_sink install"
            } else {
                "log_sink clear"
            }
            .to_string(),
        );
        *self.sink.lock() = sink;
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

struct Store {
    calls: CallLog,
    values: Mutex<HashMap<String, String>>,
    fail_keys: HashSet<String>,
}

impl Store {
    fn set(&self, key: &str, value: String) -> Result<(), Box<dyn Error>> {
        if self.fail_keys.contains(key) {
            self.calls.lock().push(format!("set {} (failed)", key));
            return Err(format!("mock failure setting {}", key).into());
        }
        self.calls.lock().push(format!("set {}={}", key, value));
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

impl Settings for Store {
    fn set_str(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        self.set(key, value.to_string())
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), Box<dyn Error>> {
        self.set(key, value.to_string())
    }

    fn set_num(&self, key: &str, value: f64) -> Result<(), Box<dyn Error>> {
        self.set(key, value.to_string())
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).and_then(|v| v.parse().ok())
    }

    fn get_num(&self, key: &str) -> Option<f64> {
        self.values.lock().get(key).and_then(|v| v.parse().ok())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.calls.lock().push("settings drop".to_string());
    }
}

struct MockSynth {
    calls: CallLog,
    banks: Mutex<Vec<(u32, PathBuf)>>,
    fail_banks: HashSet<PathBuf>,
    next_bank_id: AtomicUsize,
}

impl Synth for MockSynth {
    fn load_bank(&self, path: &Path) -> Result<u32, Box<dyn Error>> {
        if self.fail_banks.contains(path) {
            self.calls
                .lock()
                .push(format!("bank {} (failed)", path.display()));
            return Err(format!("mock failure loading {}", path.display()).into());
        }
        let id = self.next_bank_id.fetch_add(1, Ordering::Relaxed) as u32;
        self.calls.lock().push(format!("bank {}", path.display()));
        self.banks.lock().push((id, path.to_path_buf()));
        Ok(id)
    }

    fn bank_count(&self) -> usize {
        self.banks.lock().len()
    }

    fn banks(&self) -> Vec<(u32, PathBuf)> {
        self.banks.lock().clone()
    }

    fn handle_event(&self, channel: u8, message: MidiMessage) {
        self.calls
            .lock()
            .push(format!("event ch={} {:?}", channel, message));
    }

    fn render(&self, out: &mut [f32], _channels: u16) {
        out.fill(0.0);
    }

    fn set_gain(&self, _gain: f32) {}

    fn gain(&self) -> f32 {
        0.2
    }
}

impl Drop for MockSynth {
    fn drop(&mut self) {
        self.calls.lock().push("synth drop".to_string());
    }
}

struct MockRouter {
    calls: CallLog,
}

impl Router for MockRouter {
    fn route_raw(&self, raw: &[u8]) {
        self.calls.lock().push(format!("route raw len={}", raw.len()));
    }

    fn route_event(&self, channel: u8, message: MidiMessage) {
        self.calls
            .lock()
            .push(format!("route ch={} {:?}", channel, message));
    }
}

impl Drop for MockRouter {
    fn drop(&mut self) {
        self.calls.lock().push("router drop".to_string());
    }
}

struct MockMidiInput {
    calls: CallLog,
}

impl MidiInput for MockMidiInput {
    fn port_name(&self) -> String {
        "mock port".to_string()
    }
}

impl Drop for MockMidiInput {
    fn drop(&mut self) {
        self.calls.lock().push("midi_input drop".to_string());
    }
}

struct MockAudioOutput {
    calls: CallLog,
}

impl AudioOutput for MockAudioOutput {
    fn driver_name(&self) -> String {
        "mock driver".to_string()
    }
}

impl Drop for MockAudioOutput {
    fn drop(&mut self) {
        self.calls.lock().push("audio_output drop".to_string());
    }
}

/// A mock file player. Plays nothing; runs until stopped.
pub struct Player {
    id: usize,
    calls: CallLog,
    queued: Mutex<Vec<PathBuf>>,
    fail_files: HashSet<PathBuf>,
    started: AtomicBool,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Player {
    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.status() == PlayerStatus::Playing
    }

    #[cfg(test)]
    pub fn queued_files(&self) -> Vec<PathBuf> {
        self.queued.lock().clone()
    }
}

impl FilePlayer for Player {
    fn add(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        if self.started.load(Ordering::Relaxed) {
            return Err("cannot queue files after playback has started".into());
        }
        if self.fail_files.contains(path) {
            self.calls
                .lock()
                .push(format!("player#{} add {} (failed)", self.id, path.display()));
            return Err(format!("mock failure queueing {}", path.display()).into());
        }
        self.calls
            .lock()
            .push(format!("player#{} add {}", self.id, path.display()));
        self.queued.lock().push(path.to_path_buf());
        Ok(())
    }

    fn play(&self) -> Result<(), Box<dyn Error>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return Err("playback has already started".into());
        }
        self.calls.lock().push(format!("player#{} play", self.id));

        let cancelled = self.cancelled.clone();
        let finished = self.finished.clone();
        *self.thread.lock() = Some(thread::spawn(move || {
            while !cancelled.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
            finished.store(true, Ordering::Relaxed);
        }));
        Ok(())
    }

    fn stop(&self) {
        self.calls.lock().push(format!("player#{} stop", self.id));
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn join(&self) {
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
        self.calls.lock().push(format!("player#{} join", self.id));
        self.finished.store(true, Ordering::Relaxed);
    }

    fn status(&self) -> PlayerStatus {
        if self.finished.load(Ordering::Relaxed) {
            return PlayerStatus::Done;
        }
        if self.started.load(Ordering::Relaxed) {
            return PlayerStatus::Playing;
        }
        PlayerStatus::Ready
    }

    fn queued(&self) -> usize {
        self.queued.lock().len()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.calls.lock().push(format!("player#{} drop", self.id));
    }
}

struct MockCommandHandler {
    calls: CallLog,
    responses: HashMap<String, (String, i32)>,
}

impl CommandHandler for MockCommandHandler {
    fn run_command(&self, line: &str, out: &mut dyn io::Write) -> i32 {
        let line = line.trim();
        self.calls.lock().push(format!("command {}", line));
        match self.responses.get(line) {
            Some((output, status)) => {
                let _ = out.write_all(output.as_bytes());
                *status
            }
            None => {
                let _ = writeln!(out, "{}: ok", line);
                0
            }
        }
    }

    fn source(&self, path: &Path, out: &mut dyn io::Write) -> i32 {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return -1,
        };
        let mut status = 0;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_status = self.run_command(line, out);
            if line_status != 0 {
                status = line_status;
            }
        }
        status
    }
}

impl Drop for MockCommandHandler {
    fn drop(&mut self) {
        self.calls.lock().push("command_handler drop".to_string());
    }
}
