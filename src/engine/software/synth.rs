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
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use midly::MidiMessage;
use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{LogLevel, Synth as SynthTrait};

use super::SinkCell;

const NUM_CHANNELS: usize = 16;
const MAX_VOICES: usize = 64;

/// One sounding note.
struct Voice {
    channel: u8,
    key: u8,
    phase: f32,
    step: f32,
    amp: f32,
    released: bool,
}

struct State {
    voices: Vec<Voice>,
    programs: [u8; NUM_CHANNELS],
    channel_gain: [f32; NUM_CHANNELS],
    banks: Vec<(u32, PathBuf)>,
    next_bank_id: u32,
    gain: f32,
    sample_rate: f32,
}

/// The software synth core. Holds the loaded sound banks and a polyphonic
/// voice model rendered on demand by the audio output driver.
pub struct Synth {
    state: Mutex<State>,
    sink: Arc<SinkCell>,
}

impl Synth {
    pub fn new(sample_rate: f64, gain: f64, sink: Arc<SinkCell>) -> Synth {
        Synth {
            state: Mutex::new(State {
                voices: Vec::new(),
                programs: [0; NUM_CHANNELS],
                channel_gain: [1.0; NUM_CHANNELS],
                banks: Vec::new(),
                next_bank_id: 0,
                gain: gain as f32,
                sample_rate: sample_rate as f32,
            }),
            sink,
        }
    }

    fn note_on(state: &mut State, channel: u8, key: u8, vel: u8) {
        if vel == 0 {
            Synth::note_off(state, channel, key);
            return;
        }
        if state.voices.len() >= MAX_VOICES {
            // Steal the oldest voice.
            state.voices.remove(0);
        }
        let freq = 440.0 * 2f32.powf((key as f32 - 69.0) / 12.0);
        state.voices.push(Voice {
            channel,
            key,
            phase: 0.0,
            step: freq / state.sample_rate,
            amp: vel as f32 / 127.0,
            released: false,
        });
    }

    fn note_off(state: &mut State, channel: u8, key: u8) {
        for voice in state.voices.iter_mut() {
            if voice.channel == channel && voice.key == key {
                voice.released = true;
            }
        }
    }

    /// The number of currently sounding voices.
    pub fn active_voices(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// The program currently selected on the given channel.
    pub fn program(&self, channel: u8) -> u8 {
        self.state.lock().programs[channel as usize % NUM_CHANNELS]
    }
}

impl SynthTrait for Synth {
    fn load_bank(&self, path: &Path) -> Result<u32, Box<dyn Error>> {
        if !is_soundfont(path) {
            return Err(format!("{} is not a sound bank", path.display()).into());
        }

        let mut state = self.state.lock();
        let id = state.next_bank_id;
        state.next_bank_id += 1;
        state.banks.push((id, path.to_path_buf()));

        self.sink.report(
            LogLevel::Info,
            &format!("Loaded sound bank {} (id {})", path.display(), id),
        );
        Ok(id)
    }

    fn bank_count(&self) -> usize {
        self.state.lock().banks.len()
    }

    fn banks(&self) -> Vec<(u32, PathBuf)> {
        self.state.lock().banks.clone()
    }

    fn handle_event(&self, channel: u8, message: MidiMessage) {
        let mut state = self.state.lock();
        match message {
            MidiMessage::NoteOn { key, vel } => {
                Synth::note_on(&mut state, channel, key.as_int(), vel.as_int())
            }
            MidiMessage::NoteOff { key, .. } => {
                Synth::note_off(&mut state, channel, key.as_int())
            }
            MidiMessage::ProgramChange { program } => {
                state.programs[channel as usize % NUM_CHANNELS] = program.as_int();
            }
            MidiMessage::Controller { controller, value } => match controller.as_int() {
                // Channel volume.
                7 => {
                    state.channel_gain[channel as usize % NUM_CHANNELS] =
                        value.as_int() as f32 / 127.0
                }
                // All notes off.
                123 => state.voices.retain(|voice| voice.channel != channel),
                _ => debug!(
                    controller = controller.as_int(),
                    value = value.as_int(),
                    "Ignoring controller."
                ),
            },
            _ => {}
        }
    }

    fn render(&self, out: &mut [f32], channels: u16) {
        out.fill(0.0);
        let channels = channels.max(1) as usize;

        let mut state = self.state.lock();
        let gain = state.gain;
        let channel_gain = state.channel_gain;

        for voice in state.voices.iter_mut() {
            let voice_gain = gain * voice.amp * channel_gain[voice.channel as usize % NUM_CHANNELS];
            for frame in out.chunks_mut(channels) {
                let sample = (voice.phase * std::f32::consts::TAU).sin() * voice_gain;
                for slot in frame.iter_mut() {
                    *slot += sample;
                }
                voice.phase += voice.step;
                if voice.phase >= 1.0 {
                    voice.phase -= 1.0;
                }
                // Fast release to avoid clicks on note off.
                if voice.released {
                    voice.amp *= 0.999;
                }
            }
        }

        state.voices.retain(|voice| !(voice.released && voice.amp < 0.001));
    }

    fn set_gain(&self, gain: f32) {
        self.state.lock().gain = gain.clamp(0.0, 10.0);
    }

    fn gain(&self) -> f32 {
        self.state.lock().gain
    }
}

/// Returns true if the file is a standard MIDI file. Sniffs the header
/// rather than trusting the extension.
pub fn is_midi_file(path: &Path) -> bool {
    sniff(path, |header| &header[0..4] == b"MThd")
}

/// Returns true if the file is a SoundFont bank.
pub fn is_soundfont(path: &Path) -> bool {
    sniff(path, |header| {
        &header[0..4] == b"RIFF" && &header[8..12] == b"sfbk"
    })
}

fn sniff<F>(path: &Path, predicate: F) -> bool
where
    F: Fn(&[u8; 12]) -> bool,
{
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    let mut header = [0u8; 12];
    if file.read_exact(&mut header).is_err() {
        return false;
    }
    predicate(&header)
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, io::Write, sync::Arc};

    use midly::MidiMessage;
    use tempfile::tempdir;

    use crate::engine::{software::SinkCell, Synth as _};

    use super::{is_midi_file, is_soundfont, Synth};

    fn new_synth() -> Synth {
        Synth::new(44100.0, 0.2, Arc::new(SinkCell::new()))
    }

    #[test]
    fn test_note_lifecycle() {
        let synth = new_synth();
        assert_eq!(0, synth.active_voices());

        synth.handle_event(
            0,
            MidiMessage::NoteOn {
                key: 60.into(),
                vel: 100.into(),
            },
        );
        assert_eq!(1, synth.active_voices());

        // A note off releases the voice; rendering then retires it.
        synth.handle_event(
            0,
            MidiMessage::NoteOff {
                key: 60.into(),
                vel: 0.into(),
            },
        );
        let mut buf = vec![0.0f32; 2 * 44100];
        synth.render(&mut buf, 2);
        assert_eq!(0, synth.active_voices());
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        let synth = new_synth();
        synth.handle_event(
            3,
            MidiMessage::NoteOn {
                key: 64.into(),
                vel: 100.into(),
            },
        );
        synth.handle_event(
            3,
            MidiMessage::NoteOn {
                key: 64.into(),
                vel: 0.into(),
            },
        );
        let mut buf = vec![0.0f32; 2 * 44100];
        synth.render(&mut buf, 2);
        assert_eq!(0, synth.active_voices());
    }

    #[test]
    fn test_render_produces_audio() {
        let synth = new_synth();
        synth.handle_event(
            0,
            MidiMessage::NoteOn {
                key: 69.into(),
                vel: 127.into(),
            },
        );
        let mut buf = vec![0.0f32; 512];
        synth.render(&mut buf, 2);
        assert!(buf.iter().any(|sample| sample.abs() > 0.0));
    }

    #[test]
    fn test_program_change() {
        let synth = new_synth();
        assert_eq!(0, synth.program(2));
        synth.handle_event(2, MidiMessage::ProgramChange { program: 42.into() });
        assert_eq!(42, synth.program(2));
        assert_eq!(0, synth.program(3));
    }

    #[test]
    fn test_all_notes_off() {
        let synth = new_synth();
        for key in [60u8, 64, 67] {
            synth.handle_event(
                5,
                MidiMessage::NoteOn {
                    key: key.into(),
                    vel: 100.into(),
                },
            );
        }
        assert_eq!(3, synth.active_voices());
        synth.handle_event(
            5,
            MidiMessage::Controller {
                controller: 123.into(),
                value: 0.into(),
            },
        );
        assert_eq!(0, synth.active_voices());
    }

    #[test]
    fn test_classification_by_magic() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;

        let midi = dir.path().join("song.dat");
        fs::File::create(&midi)?.write_all(b"MThd\x00\x00\x00\x06\x00\x00\x00\x01")?;
        assert!(is_midi_file(&midi));
        assert!(!is_soundfont(&midi));

        let bank = dir.path().join("bank.dat");
        fs::File::create(&bank)?.write_all(b"RIFF\x04\x00\x00\x00sfbk")?;
        assert!(is_soundfont(&bank));
        assert!(!is_midi_file(&bank));

        let other = dir.path().join("other.mid");
        fs::File::create(&other)?.write_all(b"not a midi file")?;
        assert!(!is_midi_file(&other));
        assert!(!is_soundfont(&other));

        Ok(())
    }

    #[test]
    fn test_load_bank_rejects_non_banks() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let synth = new_synth();

        let bogus = dir.path().join("bogus.sf2");
        fs::File::create(&bogus)?.write_all(b"junk")?;
        assert!(synth.load_bank(&bogus).is_err());
        assert_eq!(0, synth.bank_count());

        let bank = dir.path().join("real.sf2");
        fs::File::create(&bank)?.write_all(b"RIFF\x04\x00\x00\x00sfbk")?;
        assert_eq!(0, synth.load_bank(&bank)?);
        assert_eq!(1, synth.load_bank(&bank)?);
        assert_eq!(2, synth.bank_count());

        Ok(())
    }
}
