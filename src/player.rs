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
use std::{error::Error, path::Path, sync::Arc};

use tracing::{info, span, Level, Span};

use crate::engine::{Engine, FilePlayer, PlayerStatus, Router, Synth};

/// Where the player is in its lifecycle. The absent state is represented by
/// the session holding no player at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Created, accepting files, not yet playing.
    Idle,
    /// Playback is running on the engine's playback thread.
    Playing,
    /// A stop has been requested but the playback thread has not joined yet.
    Stopping,
    /// The playback thread has joined; the player is safe to destroy.
    Done,
}

/// Wraps the engine's file player with the session's lifecycle rules: files
/// are queued only before playback starts, a stop always joins the playback
/// thread, and the object is only discarded once it has reported done.
pub struct MidiPlayer {
    handle: Arc<dyn FilePlayer>,
    state: PlayerState,
    span: Span,
}

impl MidiPlayer {
    /// Creates a new idle player. When a router is available the player is
    /// bound to it so file playback and MIDI input share one event path.
    pub fn new(
        engine: &dyn Engine,
        synth: &Arc<dyn Synth>,
        router: Option<&Arc<dyn Router>>,
    ) -> Result<MidiPlayer, Box<dyn Error>> {
        let handle = engine.new_player(synth, router)?;
        Ok(MidiPlayer {
            handle,
            state: PlayerState::Idle,
            span: span!(Level::INFO, "midi player"),
        })
    }

    /// Queues a file for playback. Only valid while idle.
    pub fn queue(&mut self, path: &Path) -> Result<(), Box<dyn Error>> {
        if self.state != PlayerState::Idle {
            return Err(format!("cannot queue files in state {:?}", self.state).into());
        }
        self.handle.add(path)
    }

    /// The number of queued files.
    pub fn queued(&self) -> usize {
        self.handle.queued()
    }

    /// Starts playback of the queued files.
    pub fn start(&mut self) -> Result<(), Box<dyn Error>> {
        if self.state != PlayerState::Idle {
            return Err(format!("cannot start playback in state {:?}", self.state).into());
        }
        let _enter = self.span.enter();

        let files = self.handle.queued();
        self.handle.play()?;
        self.state = PlayerState::Playing;
        info!(files = files, "Playback started.");
        Ok(())
    }

    /// Requests a stop and blocks until the playback thread joins. Safe to
    /// call in any state; an idle or already-done player just becomes done.
    pub fn stop_and_join(&mut self) {
        let _enter = self.span.enter();

        match self.state {
            PlayerState::Done => return,
            PlayerState::Playing => {
                info!("Stopping playback.");
                self.state = PlayerState::Stopping;
                self.handle.stop();
            }
            PlayerState::Stopping => {}
            PlayerState::Idle => self.handle.stop(),
        }

        self.handle.join();

        // Only report done once the engine agrees the thread is finished;
        // a player must never be destroyed while still winding down.
        if self.handle.status() == PlayerStatus::Done {
            self.state = PlayerState::Done;
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// True once the player is fully stopped and safe to destroy.
    pub fn is_done(&self) -> bool {
        self.state == PlayerState::Done && self.handle.status() == PlayerStatus::Done
    }

    /// A clone of the underlying engine handle, for binding the command
    /// interpreter.
    pub fn handle(&self) -> Arc<dyn FilePlayer> {
        self.handle.clone()
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, path::Path, sync::Arc};

    use crate::engine::{mock, Engine as _, FilePlayer as _, PlayerStatus};

    use super::{MidiPlayer, PlayerState};

    fn new_player(engine: &mock::Engine) -> Result<MidiPlayer, Box<dyn Error>> {
        let settings = engine.new_settings()?;
        let synth = engine.new_synth(&settings)?;
        MidiPlayer::new(engine, &synth, None)
    }

    #[test]
    fn test_lifecycle() -> Result<(), Box<dyn Error>> {
        let engine = mock::Engine::get("mock-engine");
        let mut player = new_player(&engine)?;
        assert_eq!(PlayerState::Idle, player.state());

        player.queue(Path::new("one.mid"))?;
        player.queue(Path::new("two.mid"))?;
        assert_eq!(2, player.queued());

        player.start()?;
        assert_eq!(PlayerState::Playing, player.state());
        assert!(engine.players()[0].is_playing());

        // Starting twice is invalid.
        assert!(player.start().is_err());
        // So is queueing into a playing player.
        assert!(player.queue(Path::new("three.mid")).is_err());

        player.stop_and_join();
        assert_eq!(PlayerState::Done, player.state());
        assert!(player.is_done());
        assert_eq!(PlayerStatus::Done, engine.players()[0].status());
        Ok(())
    }

    #[test]
    fn test_stop_without_start() -> Result<(), Box<dyn Error>> {
        let engine = mock::Engine::get("mock-engine");
        let mut player = new_player(&engine)?;

        player.stop_and_join();
        assert!(player.is_done());

        // Idempotent.
        player.stop_and_join();
        assert!(player.is_done());
        Ok(())
    }

    #[test]
    fn test_queue_failure_surfaces() -> Result<(), Box<dyn Error>> {
        let engine = mock::Engine::get("mock-engine");
        engine.fail_player_file(Path::new("broken.mid"));
        let mut player = new_player(&engine)?;

        assert!(player.queue(Path::new("broken.mid")).is_err());
        assert!(player.queue(Path::new("fine.mid")).is_ok());
        assert_eq!(1, player.queued());
        Ok(())
    }
}
