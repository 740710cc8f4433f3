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
use std::{fs, io, path::Path, sync::Arc};

use midly::MidiMessage;

use crate::engine::{CommandHandler, FilePlayer, Router, Settings, Synth};

const OK: i32 = 0;
const ERR: i32 = -1;

const HELP: &str = "\
help                      print this list
echo TEXT                 print TEXT
get KEY                   print the value of a setting
set KEY VALUE             change the value of a setting
settings                  print all settings
gain GAIN                 set the master gain (0 <= GAIN <= 10)
load FILE                 load a sound bank
fonts                     print the loaded sound banks
noteon CHAN KEY VEL       send a note-on event
noteoff CHAN KEY          send a note-off event
prog CHAN NUM             send a program change
cc CHAN CTRL VAL          send a control change
reset                     all notes off on all channels
player-start              start the MIDI file player
player-stop               stop the MIDI file player
source FILE               execute commands from a file
";

/// The engine's command interpreter. Bound to its handles at construction;
/// commands that need an unbound handle fail at dispatch time.
pub struct Shell {
    settings: Arc<dyn Settings>,
    synth: Option<Arc<dyn Synth>>,
    router: Option<Arc<dyn Router>>,
    player: Option<Arc<dyn FilePlayer>>,
}

impl Shell {
    pub fn new(
        settings: Arc<dyn Settings>,
        synth: Option<Arc<dyn Synth>>,
        router: Option<Arc<dyn Router>>,
        player: Option<Arc<dyn FilePlayer>>,
    ) -> Shell {
        Shell {
            settings,
            synth,
            router,
            player,
        }
    }

    fn synth(&self, out: &mut dyn io::Write) -> Option<&Arc<dyn Synth>> {
        if self.synth.is_none() {
            let _ = writeln!(out, "no synth is loaded");
        }
        self.synth.as_ref()
    }

    /// Sends a channel event through the router when one is bound so shell
    /// events share the regular event path.
    fn send_event(&self, channel: u8, message: MidiMessage) {
        match self.router.as_ref() {
            Some(router) => router.route_event(channel, message),
            None => {
                if let Some(synth) = self.synth.as_ref() {
                    synth.handle_event(channel, message);
                }
            }
        }
    }

    fn cmd_get(&self, args: &[&str], out: &mut dyn io::Write) -> i32 {
        let key = match args.first() {
            Some(key) => *key,
            None => {
                let _ = writeln!(out, "usage: get KEY");
                return ERR;
            }
        };

        if let Some(value) = self.settings.get_str(key) {
            let _ = writeln!(out, "{}", value);
            return OK;
        }
        if let Some(value) = self.settings.get_int(key) {
            let _ = writeln!(out, "{}", value);
            return OK;
        }
        if let Some(value) = self.settings.get_num(key) {
            let _ = writeln!(out, "{}", value);
            return OK;
        }

        let _ = writeln!(out, "no setting with key {}", key);
        ERR
    }

    fn cmd_set(&self, args: &[&str], out: &mut dyn io::Write) -> i32 {
        let (key, value) = match (args.first(), args.get(1)) {
            (Some(key), Some(value)) => (*key, *value),
            _ => {
                let _ = writeln!(out, "usage: set KEY VALUE");
                return ERR;
            }
        };

        // The registered type of the key decides how the value is parsed.
        let result = if self.settings.get_str(key).is_some() {
            self.settings.set_str(key, value)
        } else if self.settings.get_int(key).is_some() {
            match value.parse::<i64>() {
                Ok(value) => self.settings.set_int(key, value),
                Err(e) => Err(e.into()),
            }
        } else if self.settings.get_num(key).is_some() {
            match value.parse::<f64>() {
                Ok(value) => self.settings.set_num(key, value),
                Err(e) => Err(e.into()),
            }
        } else {
            Err(format!("no setting with key {}", key).into())
        };

        match result {
            Ok(()) => OK,
            Err(e) => {
                let _ = writeln!(out, "{}", e);
                ERR
            }
        }
    }

    fn cmd_settings(&self, out: &mut dyn io::Write) -> i32 {
        for key in self.settings.keys() {
            if let Some(value) = self.settings.get_str(&key) {
                let _ = writeln!(out, "{}: {}", key, value);
            } else if let Some(value) = self.settings.get_int(&key) {
                let _ = writeln!(out, "{}: {}", key, value);
            } else if let Some(value) = self.settings.get_num(&key) {
                let _ = writeln!(out, "{}: {}", key, value);
            }
        }
        OK
    }

    fn cmd_gain(&self, args: &[&str], out: &mut dyn io::Write) -> i32 {
        let synth = match self.synth(out) {
            Some(synth) => synth,
            None => return ERR,
        };
        match args.first().map(|gain| gain.parse::<f32>()) {
            Some(Ok(gain)) if (0.0..=10.0).contains(&gain) => {
                synth.set_gain(gain);
                OK
            }
            _ => {
                let _ = writeln!(out, "usage: gain GAIN (0 <= GAIN <= 10)");
                ERR
            }
        }
    }

    fn cmd_load(&self, args: &[&str], out: &mut dyn io::Write) -> i32 {
        let synth = match self.synth(out) {
            Some(synth) => synth,
            None => return ERR,
        };
        let path = match args.first() {
            Some(path) => *path,
            None => {
                let _ = writeln!(out, "usage: load FILE");
                return ERR;
            }
        };
        match synth.load_bank(Path::new(path)) {
            Ok(id) => {
                let _ = writeln!(out, "loaded sound bank {} (id {})", path, id);
                OK
            }
            Err(e) => {
                let _ = writeln!(out, "failed to load {}: {}", path, e);
                ERR
            }
        }
    }

    fn cmd_fonts(&self, out: &mut dyn io::Write) -> i32 {
        let synth = match self.synth(out) {
            Some(synth) => synth,
            None => return ERR,
        };
        let banks = synth.banks();
        if banks.is_empty() {
            let _ = writeln!(out, "no sound banks loaded");
            return OK;
        }
        for (id, path) in banks {
            let _ = writeln!(out, "{} {}", id, path.display());
        }
        OK
    }

    fn cmd_event(&self, name: &str, args: &[&str], out: &mut dyn io::Write) -> i32 {
        if self.synth(out).is_none() {
            return ERR;
        }

        let mut nums: Vec<u8> = Vec::with_capacity(args.len());
        for arg in args {
            match arg.parse::<u8>() {
                Ok(num) => nums.push(num),
                Err(_) => {
                    let _ = writeln!(out, "invalid argument {}", arg);
                    return ERR;
                }
            }
        }

        let (channel, message) = match (name, nums.as_slice()) {
            ("noteon", [chan, key, vel]) => (
                *chan,
                MidiMessage::NoteOn {
                    key: (*key).into(),
                    vel: (*vel).into(),
                },
            ),
            ("noteoff", [chan, key]) => (
                *chan,
                MidiMessage::NoteOff {
                    key: (*key).into(),
                    vel: 0.into(),
                },
            ),
            ("prog", [chan, num]) => (
                *chan,
                MidiMessage::ProgramChange {
                    program: (*num).into(),
                },
            ),
            ("cc", [chan, ctrl, val]) => (
                *chan,
                MidiMessage::Controller {
                    controller: (*ctrl).into(),
                    value: (*val).into(),
                },
            ),
            _ => {
                let _ = writeln!(out, "usage: {} CHAN ...", name);
                return ERR;
            }
        };

        self.send_event(channel, message);
        OK
    }

    fn cmd_reset(&self, out: &mut dyn io::Write) -> i32 {
        if self.synth(out).is_none() {
            return ERR;
        }
        for channel in 0..16u8 {
            self.send_event(
                channel,
                MidiMessage::Controller {
                    controller: 123.into(),
                    value: 0.into(),
                },
            );
        }
        OK
    }

    fn player(&self, out: &mut dyn io::Write) -> Option<&Arc<dyn FilePlayer>> {
        if self.player.is_none() {
            let _ = writeln!(out, "no player is loaded");
        }
        self.player.as_ref()
    }
}

impl CommandHandler for Shell {
    fn run_command(&self, line: &str, out: &mut dyn io::Write) -> i32 {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (command, args) = match tokens.split_first() {
            Some((command, args)) => (*command, args),
            None => return OK,
        };

        match command {
            "help" => {
                let _ = write!(out, "{}", HELP);
                OK
            }
            "echo" => {
                let _ = writeln!(out, "{}", args.join(" "));
                OK
            }
            "get" => self.cmd_get(args, out),
            "set" => self.cmd_set(args, out),
            "settings" => self.cmd_settings(out),
            "gain" => self.cmd_gain(args, out),
            "load" => self.cmd_load(args, out),
            "fonts" => self.cmd_fonts(out),
            "noteon" | "noteoff" | "prog" | "cc" => self.cmd_event(command, args, out),
            "reset" => self.cmd_reset(out),
            "player-start" => match self.player(out) {
                Some(player) => match player.play() {
                    Ok(()) => OK,
                    Err(e) => {
                        let _ = writeln!(out, "{}", e);
                        ERR
                    }
                },
                None => ERR,
            },
            "player-stop" => match self.player(out) {
                Some(player) => {
                    player.stop();
                    OK
                }
                None => ERR,
            },
            "source" => match args.first() {
                Some(path) => self.source(Path::new(path), out),
                None => {
                    let _ = writeln!(out, "usage: source FILE");
                    ERR
                }
            },
            _ => {
                let _ = writeln!(out, "unknown command {}", command);
                ERR
            }
        }
    }

    fn source(&self, path: &Path, out: &mut dyn io::Write) -> i32 {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                let _ = writeln!(out, "cannot read {}: {}", path.display(), e);
                return ERR;
            }
        };

        let mut status = OK;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_status = self.run_command(line, out);
            if line_status != OK {
                status = line_status;
            }
        }
        status
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, io::Write as _, sync::Arc};

    use crate::engine::{software::SinkCell, CommandHandler as _, Synth as _};

    use super::super::{settings::Store, synth::Synth};
    use super::Shell;

    fn new_shell() -> (Shell, Arc<Synth>) {
        let sink = Arc::new(SinkCell::new());
        let settings: Arc<dyn crate::engine::Settings> = Arc::new(Store::new());
        let synth = Arc::new(Synth::new(44100.0, 0.2, sink));
        (
            Shell::new(settings, Some(synth.clone()), None, None),
            synth,
        )
    }

    fn run(shell: &Shell, line: &str) -> (i32, String) {
        let mut out: Vec<u8> = Vec::new();
        let status = shell.run_command(line, &mut out);
        (status, String::from_utf8(out).expect("output is utf-8"))
    }

    #[test]
    fn test_help() {
        let (shell, _) = new_shell();
        let (status, out) = run(&shell, "help");
        assert_eq!(0, status);
        assert!(out.contains("noteon"));
        assert!(out.contains("settings"));
    }

    #[test]
    fn test_get_set() {
        let (shell, _) = new_shell();

        let (status, _) = run(&shell, "set shell.prompt hello");
        assert_eq!(0, status);
        let (status, out) = run(&shell, "get shell.prompt");
        assert_eq!(0, status);
        assert_eq!("hello\n", out);

        // Typed parse through the shell.
        let (status, _) = run(&shell, "set midi.autoconnect 1");
        assert_eq!(0, status);
        let (status, out) = run(&shell, "get midi.autoconnect");
        assert_eq!(0, status);
        assert_eq!("1\n", out);

        let (status, _) = run(&shell, "set midi.autoconnect notanumber");
        assert_eq!(-1, status);

        let (status, out) = run(&shell, "get no.such.key");
        assert_eq!(-1, status);
        assert!(out.contains("no setting"));
    }

    #[test]
    fn test_unknown_command() {
        let (shell, _) = new_shell();
        let (status, out) = run(&shell, "frobnicate");
        assert_eq!(-1, status);
        assert!(out.contains("unknown command"));
    }

    #[test]
    fn test_noteon_noteoff() {
        let (shell, synth) = new_shell();

        let (status, _) = run(&shell, "noteon 0 60 100");
        assert_eq!(0, status);
        assert_eq!(1, synth.active_voices());

        let (status, _) = run(&shell, "noteoff 0 60");
        assert_eq!(0, status);

        let (status, _) = run(&shell, "noteon 0 sixty 100");
        assert_eq!(-1, status);
    }

    #[test]
    fn test_synthless_shell_reports_missing_synth() {
        let settings: Arc<dyn crate::engine::Settings> = Arc::new(Store::new());
        let shell = Shell::new(settings, None, None, None);

        let (status, out) = run(&shell, "noteon 0 60 100");
        assert_eq!(-1, status);
        assert!(out.contains("no synth"));

        // Settings commands still work without a synth.
        let (status, _) = run(&shell, "get audio.driver");
        assert_eq!(0, status);
    }

    #[test]
    fn test_gain() {
        let (shell, synth) = new_shell();
        let (status, _) = run(&shell, "gain 0.5");
        assert_eq!(0, status);
        assert_eq!(0.5, synth.gain());

        let (status, _) = run(&shell, "gain 100");
        assert_eq!(-1, status);
    }

    #[test]
    fn test_source() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("startup.conf");
        let mut file = fs::File::create(&path)?;
        writeln!(file, "# startup commands")?;
        writeln!(file, "set shell.prompt fluid> ")?;
        writeln!(file)?;
        writeln!(file, "gain 0.7")?;
        drop(file);

        let (shell, synth) = new_shell();
        let mut out: Vec<u8> = Vec::new();
        assert_eq!(0, shell.source(&path, &mut out));
        assert_eq!(0.7, synth.gain());

        // A failing line makes the batch fail but later lines still run.
        let bad = dir.path().join("bad.conf");
        fs::write(&bad, "bogus command\ngain 0.9\n")?;
        let mut out: Vec<u8> = Vec::new();
        assert_eq!(-1, shell.source(&bad, &mut out));
        assert_eq!(0.9, synth.gain());

        Ok(())
    }
}
