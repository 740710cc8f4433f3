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
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::sync::{mpsc::UnboundedSender, Notify};
use tracing::debug;

use crate::session::SessionEvent;

/// How many bytes one drain wake-up reads at most. An implementation
/// constant, not a protocol limit: longer command output is delivered
/// across several `DataRead` events.
pub const READ_BUFFER_SIZE: usize = 16384;

struct Shared {
    buf: Mutex<Vec<u8>>,
    status: AtomicI32,
    closed: AtomicBool,
    notify: Notify,
}

/// Carries command output from the engine's blocking interpreter back to the
/// event-driven caller. The interpreter writes into the shared buffer
/// through a [`Writer`]; finishing a command notifies the drain task, which
/// performs one bounded read per wake-up and emits a `DataRead` event for
/// any bytes it found, re-arming itself while bytes remain. One wake-up is
/// never assumed to deliver one complete response.
pub struct Bridge {
    shared: Arc<Shared>,
    drain: tokio::task::JoinHandle<()>,
}

impl Bridge {
    /// Creates the bridge and spawns its drain task. Must be called from
    /// within a tokio runtime.
    pub fn new(events_tx: UnboundedSender<SessionEvent>) -> Bridge {
        let shared = Arc::new(Shared {
            buf: Mutex::new(Vec::new()),
            status: AtomicI32::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let drain = {
            let shared = shared.clone();
            tokio::spawn(async move {
                loop {
                    shared.notify.notified().await;
                    if shared.closed.load(Ordering::Relaxed) {
                        return;
                    }

                    // Exactly one bounded read per wake-up.
                    let (chunk, more) = {
                        let mut buf = shared.buf.lock();
                        let len = buf.len().min(READ_BUFFER_SIZE);
                        let chunk: Vec<u8> = buf.drain(..len).collect();
                        (chunk, !buf.is_empty())
                    };

                    if !chunk.is_empty() {
                        debug!(len = chunk.len(), "Draining command output.");
                        if events_tx
                            .send(SessionEvent::DataRead {
                                data: chunk,
                                status: shared.status.load(Ordering::Relaxed),
                            })
                            .is_err()
                        {
                            // Receiver is gone; nothing left to deliver to.
                            return;
                        }
                    }

                    if more {
                        shared.notify.notify_one();
                    }
                }
            })
        };

        Bridge { shared, drain }
    }

    /// The write end handed to the interpreter as its output sink.
    pub fn writer(&self) -> Writer {
        Writer {
            shared: self.shared.clone(),
        }
    }

    /// Caches the status of the command that just executed and triggers a
    /// drain of whatever the interpreter wrote.
    pub fn finish_command(&self, status: i32) {
        self.shared.status.store(status, Ordering::Relaxed);
        self.shared.notify.notify_one();
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.shared.notify.notify_one();
        self.drain.abort();
    }
}

/// The bridge's write end. Appending never blocks and never fails; the
/// buffer is unbounded because a command's output is drained promptly after
/// the command returns.
pub struct Writer {
    shared: Arc<Shared>,
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write as _;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::session::SessionEvent;

    use super::{Bridge, READ_BUFFER_SIZE};

    async fn recv_data(
        events_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Option<(Vec<u8>, i32)> {
        let event = tokio::time::timeout(Duration::from_secs(3), events_rx.recv())
            .await
            .ok()??;
        match event {
            SessionEvent::DataRead { data, status } => Some((data, status)),
            event => panic!("unexpected event {:?}", event),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delivers_output_with_status() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::new(events_tx);

        bridge
            .writer()
            .write_all(b"help output\n")
            .expect("write should succeed");
        bridge.finish_command(0);

        let (data, status) = recv_data(&mut events_rx).await.expect("expected data");
        assert_eq!(b"help output\n".to_vec(), data);
        assert_eq!(0, status);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_output_emits_nothing() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::new(events_tx);

        bridge.finish_command(0);

        // Give the drain task a chance to run, then confirm silence.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events_rx.try_recv().is_err());
        drop(bridge);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_large_output_spans_multiple_events() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::new(events_tx);

        let payload: Vec<u8> = (0..READ_BUFFER_SIZE * 2 + 100)
            .map(|i| (i % 251) as u8)
            .collect();
        bridge
            .writer()
            .write_all(&payload)
            .expect("write should succeed");
        bridge.finish_command(-1);

        let mut collected: Vec<u8> = Vec::new();
        let mut events = 0;
        while collected.len() < payload.len() {
            let (data, status) = recv_data(&mut events_rx).await.expect("expected data");
            assert!(data.len() <= READ_BUFFER_SIZE);
            assert_eq!(-1, status);
            collected.extend_from_slice(&data);
            events += 1;
        }
        assert_eq!(payload, collected);
        assert!(events >= 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_reflects_most_recent_command() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let bridge = Bridge::new(events_tx);

        bridge
            .writer()
            .write_all(b"first")
            .expect("write should succeed");
        bridge.finish_command(0);
        let (_, status) = recv_data(&mut events_rx).await.expect("expected data");
        assert_eq!(0, status);

        bridge
            .writer()
            .write_all(b"second")
            .expect("write should succeed");
        bridge.finish_command(-1);
        let (_, status) = recv_data(&mut events_rx).await.expect("expected data");
        assert_eq!(-1, status);
    }
}
