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
    io::{self, Write},
};

use tokio::sync::mpsc::{self, Sender, UnboundedReceiver};
use tracing::info;

use crate::engine::LogLevel;
use crate::session::{SessionEvent, SessionManager};

const QUIT: &str = "quit";

/// Runs the interactive console over stdin/stdout until the user quits or
/// input ends, then tears the session down. Commands are forwarded to the
/// session one line at a time; responses and diagnostics are rendered as
/// their events arrive.
pub async fn run(
    mut session: SessionManager,
    mut events_rx: UnboundedReceiver<SessionEvent>,
) -> Result<(), Box<dyn Error>> {
    let (lines_tx, mut lines_rx) = mpsc::channel::<String>(1);
    let reader = tokio::task::spawn_blocking(move || monitor_input(&lines_tx, io::stdin().lock()));

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => {
                    render_event(&event, &session.prompt(), &mut io::stdout(), &mut io::stderr())?;
                }
                None => break,
            },
            line = lines_rx.recv() => match line {
                Some(line) => {
                    if line.trim() == QUIT {
                        break;
                    }
                    session.command(&line);
                    print_prompt(&session.prompt(), &mut io::stdout())?;
                }
                None => {
                    info!("Console input closed.");
                    break;
                }
            },
        }
    }

    session.teardown();
    reader.abort();
    Ok(())
}

/// Forwards stdin lines to the console loop. Returns on end of input.
fn monitor_input<R>(lines_tx: &Sender<String>, mut reader: R) -> Result<(), io::Error>
where
    R: io::BufRead,
{
    loop {
        let mut input = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(());
        }
        if lines_tx.blocking_send(input).is_err() {
            return Ok(());
        }
    }
}

/// Renders one session event. Command output and diagnostics with a
/// non-zero severity go to the error stream, everything else to the output
/// stream.
fn render_event<W1, W2>(
    event: &SessionEvent,
    prompt: &str,
    stdout: &mut W1,
    stderr: &mut W2,
) -> Result<(), io::Error>
where
    W1: io::Write,
    W2: io::Write,
{
    match event {
        SessionEvent::Initialized => {
            writeln!(stdout, "Type 'help' for help topics.")?;
            print_prompt(prompt, stdout)?;
        }
        SessionEvent::DataRead { data, status } => {
            if *status == 0 {
                stdout.write_all(data)?;
                stdout.flush()?;
            } else {
                stderr.write_all(data)?;
                stderr.flush()?;
            }
        }
        SessionEvent::Diagnostics { level, message } => {
            if *level == LogLevel::Error || *level == LogLevel::Warning {
                writeln!(stderr, "{}: {}", level, message)?;
            } else {
                writeln!(stdout, "{}: {}", level, message)?;
            }
        }
        SessionEvent::MidiPlayerActive => {
            info!("MIDI player is active.");
        }
    }
    Ok(())
}

fn print_prompt<W: Write>(prompt: &str, stdout: &mut W) -> Result<(), io::Error> {
    write!(stdout, "{}", prompt)?;
    stdout.flush()
}

#[cfg(test)]
mod test {
    use std::io::BufReader;

    use tokio::sync::mpsc;

    use crate::engine::LogLevel;
    use crate::session::SessionEvent;

    use super::{monitor_input, render_event};

    fn drain_lines(lines_rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = lines_rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_monitor_input_forwards_lines() {
        let (lines_tx, mut lines_rx) = mpsc::channel::<String>(10);
        let reader = BufReader::new("help\nquit\n".as_bytes());

        monitor_input(&lines_tx, reader).expect("monitor should succeed");
        drop(lines_tx);

        assert_eq!(
            vec!["help\n".to_string(), "quit\n".to_string()],
            drain_lines(&mut lines_rx)
        );
    }

    #[test]
    fn test_render_initialized() {
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();
        render_event(&SessionEvent::Initialized, "> ", &mut stdout, &mut stderr)
            .expect("render should succeed");

        let text = String::from_utf8(stdout).expect("output is utf-8");
        assert!(text.contains("help topics"));
        assert!(text.ends_with("> "));
        assert!(stderr.is_empty());
    }

    #[test]
    fn test_render_data_read_splits_by_status() {
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();

        render_event(
            &SessionEvent::DataRead {
                data: b"all good\n".to_vec(),
                status: 0,
            },
            "> ",
            &mut stdout,
            &mut stderr,
        )
        .expect("render should succeed");
        render_event(
            &SessionEvent::DataRead {
                data: b"that failed\n".to_vec(),
                status: -1,
            },
            "> ",
            &mut stdout,
            &mut stderr,
        )
        .expect("render should succeed");

        assert_eq!(b"all good\n".to_vec(), stdout);
        assert_eq!(b"that failed\n".to_vec(), stderr);
    }

    #[test]
    fn test_render_diagnostics_prefixes_level() {
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();

        for (level, message) in [
            (LogLevel::Error, "engine exploded"),
            (LogLevel::Warning, "engine wobbled"),
            (LogLevel::Info, "engine hummed"),
        ] {
            render_event(
                &SessionEvent::Diagnostics {
                    level,
                    message: message.to_string(),
                },
                "> ",
                &mut stdout,
                &mut stderr,
            )
            .expect("render should succeed");
        }

        let err_text = String::from_utf8(stderr).expect("output is utf-8");
        assert!(err_text.contains("Error: engine exploded"));
        assert!(err_text.contains("Warning: engine wobbled"));
        let out_text = String::from_utf8(stdout).expect("output is utf-8");
        assert!(out_text.contains("Information: engine hummed"));
    }
}
