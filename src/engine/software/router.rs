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
use std::sync::Arc;

use midly::{live::LiveEvent, MidiMessage};
use tracing::debug;

use crate::engine::{LogLevel, Router as RouterTrait, Synth};

use super::SinkCell;

/// Routes MIDI events into the synth. Hardware input and file playback both
/// deliver through here so the synth sees a single event stream.
pub struct Router {
    synth: Arc<dyn Synth>,
    sink: Arc<SinkCell>,
}

impl Router {
    pub fn new(synth: Arc<dyn Synth>, sink: Arc<SinkCell>) -> Router {
        Router { synth, sink }
    }
}

impl RouterTrait for Router {
    fn route_raw(&self, raw: &[u8]) {
        match LiveEvent::parse(raw) {
            Ok(LiveEvent::Midi { channel, message }) => {
                self.route_event(channel.as_int(), message)
            }
            Ok(event) => debug!(event = format!("{:?}", event), "Ignoring non-channel event."),
            Err(e) => self.sink.report(
                LogLevel::Warning,
                &format!("Dropping unparseable MIDI message: {}", e),
            ),
        }
    }

    fn route_event(&self, channel: u8, message: MidiMessage) {
        self.synth.handle_event(channel, message);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::engine::{software::SinkCell, Router as _, Synth as _};

    use super::super::synth::Synth;
    use super::Router;

    #[test]
    fn test_route_raw_note_on() {
        let sink = Arc::new(SinkCell::new());
        let synth = Arc::new(Synth::new(44100.0, 0.2, sink.clone()));
        let router = Router::new(synth.clone(), sink);

        // Note on, channel 0, key 60, velocity 100.
        router.route_raw(&[0x90, 60, 100]);
        assert_eq!(1, synth.active_voices());

        // Note off retires the voice after a render pass.
        router.route_raw(&[0x80, 60, 0]);
        let mut buf = vec![0.0f32; 2 * 44100];
        synth.render(&mut buf, 2);
        assert_eq!(0, synth.active_voices());
    }

    #[test]
    fn test_route_raw_garbage_is_dropped() {
        let sink = Arc::new(SinkCell::new());
        let synth = Arc::new(Synth::new(44100.0, 0.2, sink.clone()));
        let router = Router::new(synth.clone(), sink);

        router.route_raw(&[0x00, 0x01]);
        assert_eq!(0, synth.active_voices());
    }
}
