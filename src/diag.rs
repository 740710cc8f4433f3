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
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::engine::{LogLevel, LogSink};
use crate::session::SessionEvent;

/// Republishes the engine's internal log lines as session events. Installed
/// as the engine's log sink at session start and cleared again at teardown,
/// before any resource is destroyed, so the engine can never call into a
/// dead session.
pub struct DiagnosticRelay {
    events_tx: UnboundedSender<SessionEvent>,
}

impl DiagnosticRelay {
    pub fn new(events_tx: UnboundedSender<SessionEvent>) -> DiagnosticRelay {
        DiagnosticRelay { events_tx }
    }
}

impl LogSink for DiagnosticRelay {
    fn log(&self, level: LogLevel, message: &str) {
        // Debug is intentionally excluded from the relay.
        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Debug => return,
        }

        // The receiver disappearing just means the session is gone; there is
        // nobody left to tell.
        let _ = self.events_tx.send(SessionEvent::Diagnostics {
            level,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::mpsc;

    use crate::engine::{LogLevel, LogSink as _};
    use crate::session::SessionEvent;

    use super::DiagnosticRelay;

    #[test]
    fn test_relays_leveled_lines() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let relay = DiagnosticRelay::new(events_tx);

        relay.log(LogLevel::Error, "engine exploded");
        relay.log(LogLevel::Warning, "engine wobbled");
        relay.log(LogLevel::Info, "engine hummed");

        for (level, message) in [
            (LogLevel::Error, "engine exploded"),
            (LogLevel::Warning, "engine wobbled"),
            (LogLevel::Info, "engine hummed"),
        ] {
            match events_rx.try_recv().expect("expected event") {
                SessionEvent::Diagnostics {
                    level: got_level,
                    message: got_message,
                } => {
                    assert_eq!(level, got_level);
                    assert_eq!(message, got_message);
                }
                event => panic!("unexpected event {:?}", event),
            }
        }
    }

    #[test]
    fn test_debug_is_excluded() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let relay = DiagnosticRelay::new(events_tx);

        relay.log(LogLevel::Debug, "noisy internals");
        assert!(events_rx.try_recv().is_err());
    }
}
