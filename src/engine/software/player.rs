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
    cmp::min,
    error::Error,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use midly::{Format, Smf};
use nodi::{timers::Ticker, Connection, Sheet, Timer};
use parking_lot::Mutex;
use tracing::{info, span, Level};

use crate::engine::{FilePlayer, LogLevel, PlayerStatus, Router, Synth};

use super::SinkCell;

/// This is the maximum amount of ticks that the player can sleep for before
/// checking whether playback has been cancelled. Lowering this may result in
/// more frequent CPU spinning.
const MAX_TICKS_PER_SLEEP: u32 = 200;

struct QueuedFile {
    path: PathBuf,
    ticker: Ticker,
    sheet: Sheet,
}

/// Plays queued MIDI files sequentially on a background thread, delivering
/// events through the router when one is bound so file playback and hardware
/// input share the same path into the synth.
pub struct Player {
    synth: Arc<dyn Synth>,
    router: Option<Arc<dyn Router>>,
    sink: Arc<SinkCell>,
    queue: Mutex<Vec<QueuedFile>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    started: AtomicBool,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl Player {
    pub fn new(
        synth: Arc<dyn Synth>,
        router: Option<Arc<dyn Router>>,
        sink: Arc<SinkCell>,
    ) -> Player {
        Player {
            synth,
            router,
            sink,
            queue: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
            started: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl FilePlayer for Player {
    fn add(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        if self.started.load(Ordering::Relaxed) {
            return Err("cannot queue files after playback has started".into());
        }

        let buf: Vec<u8> = fs::read(path)?;
        let smf = Smf::parse(&buf)?;
        let ticker = Ticker::try_from(smf.header.timing)?;
        let sheet = match smf.header.format {
            Format::SingleTrack | Format::Sequential => Sheet::sequential(&smf.tracks),
            Format::Parallel => Sheet::parallel(&smf.tracks),
        };

        self.queue.lock().push(QueuedFile {
            path: path.to_path_buf(),
            ticker,
            sheet,
        });
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

        let files = std::mem::take(&mut *self.queue.lock());
        let synth = self.synth.clone();
        let router = self.router.clone();
        let sink = self.sink.clone();
        let cancelled = self.cancelled.clone();
        let finished = self.finished.clone();

        *self.thread.lock() = Some(thread::spawn(move || {
            let play_span = span!(Level::INFO, "midi playback");
            let _enter = play_span.enter();

            for file in files {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }

                info!(file = file.path.display().to_string(), "Playing MIDI file.");
                sink.report(
                    LogLevel::Info,
                    &format!("Playing {}", file.path.display()),
                );

                let connection = PlayConnection {
                    synth: synth.clone(),
                    router: router.clone(),
                    cancelled: cancelled.clone(),
                };
                let mut player = nodi::Player::new(
                    CancelTimer::new(file.ticker, cancelled.clone()),
                    connection,
                );
                player.play(&file.sheet);
            }

            finished.store(true, Ordering::Relaxed);
        }));

        Ok(())
    }

    fn stop(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn join(&self) {
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                self.sink
                    .report(LogLevel::Error, "MIDI playback thread panicked");
            }
        }
        // A player that never started has nothing to wait for.
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
        self.queue.lock().len()
    }
}

/// Delivers playback events into the shared event path, stopping the nodi
/// player as soon as cancellation is requested.
struct PlayConnection {
    synth: Arc<dyn Synth>,
    router: Option<Arc<dyn Router>>,
    cancelled: Arc<AtomicBool>,
}

impl Connection for PlayConnection {
    fn play(&mut self, event: nodi::MidiEvent) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return false;
        }

        match self.router.as_ref() {
            Some(router) => router.route_event(event.channel.as_int(), event.message),
            None => self.synth.handle_event(event.channel.as_int(), event.message),
        }
        true
    }
}

/// A timer that sleeps in bounded chunks so a stop request interrupts long
/// inter-event gaps promptly.
struct CancelTimer<T: Timer> {
    timer: T,
    cancelled: Arc<AtomicBool>,
}

impl<T: Timer> CancelTimer<T> {
    fn new(timer: T, cancelled: Arc<AtomicBool>) -> CancelTimer<T> {
        CancelTimer { timer, cancelled }
    }
}

impl<T: Timer> Timer for CancelTimer<T> {
    fn sleep_duration(&mut self, n_ticks: u32) -> std::time::Duration {
        self.timer.sleep_duration(n_ticks)
    }

    fn change_tempo(&mut self, tempo: u32) {
        self.timer.change_tempo(tempo);
    }

    fn sleep(&mut self, n_ticks: u32) {
        let mut remaining_ticks = n_ticks;
        loop {
            let num_ticks = min(remaining_ticks, MAX_TICKS_PER_SLEEP);
            self.timer.sleep(num_ticks);
            if remaining_ticks == num_ticks {
                return;
            }
            remaining_ticks -= MAX_TICKS_PER_SLEEP;

            if self.cancelled.load(Ordering::Relaxed) {
                return;
            }
        }
    }
}
