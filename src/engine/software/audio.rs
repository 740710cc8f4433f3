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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::error;

use crate::engine::{AudioOutput, LogLevel, Settings, Synth};

use super::SinkCell;

/// An active audio output. The cpal stream is owned by a dedicated thread
/// because the stream handle cannot move between threads; the driver object
/// only carries the stop flag and the join handle.
pub struct Output {
    driver_name: String,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Output {
    /// Creates an audio output driver for the name in `audio.driver`.
    /// `default`/`cpal` use the host's default output device; `null`
    /// renders and discards, for machines with no audio hardware.
    pub fn new(
        settings: &Arc<dyn Settings>,
        synth: Arc<dyn Synth>,
        sink: Arc<SinkCell>,
    ) -> Result<Output, Box<dyn Error>> {
        let driver = settings
            .get_str("audio.driver")
            .unwrap_or_else(|| "default".to_string());
        let sample_rate = settings.get_num("synth.sample-rate").unwrap_or(44100.0) as u32;
        let period_size = settings.get_int("audio.period-size").unwrap_or(512) as usize;

        match driver.as_str() {
            "default" | "cpal" => Output::new_cpal(synth, sink, sample_rate),
            "null" => Ok(Output::new_null(synth, sink, sample_rate, period_size)),
            _ => Err(format!("unknown audio driver {}", driver).into()),
        }
    }

    fn new_cpal(
        synth: Arc<dyn Synth>,
        sink: Arc<SinkCell>,
        sample_rate: u32,
    ) -> Result<Output, Box<dyn Error>> {
        let stop = Arc::new(AtomicBool::new(false));
        // The stream is created on the owner thread; construction success or
        // failure is reported back through this rendezvous channel.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String, String>>(1);

        let thread = {
            let stop = stop.clone();
            thread::spawn(move || {
                let host = cpal::default_host();
                let device = match host.default_output_device() {
                    Some(device) => device,
                    None => {
                        let _ = ready_tx.send(Err("no default audio output device".to_string()));
                        return;
                    }
                };
                let name = device.name().unwrap_or_else(|_| "unknown".to_string());

                let channels: u16 = match device.default_output_config() {
                    Ok(config) => config.channels(),
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                let config = cpal::StreamConfig {
                    channels,
                    sample_rate,
                    buffer_size: cpal::BufferSize::Default,
                };

                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        synth.render(data, channels);
                    },
                    |err| error!(err = err.to_string(), "Audio output stream error."),
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }

                let _ = ready_tx.send(Ok(name));

                // Keep the stream alive until the driver is dropped.
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(50));
                }
            })
        };

        match ready_rx.recv()? {
            Ok(name) => {
                sink.report(LogLevel::Info, &format!("Audio output started on {}", name));
                Ok(Output {
                    driver_name: name,
                    stop,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                // The owner thread has already returned.
                let _ = thread.join();
                Err(e.into())
            }
        }
    }

    /// A driver that pulls samples from the synth at a steady rate and
    /// discards them. Keeps voice bookkeeping moving without hardware.
    fn new_null(
        synth: Arc<dyn Synth>,
        sink: Arc<SinkCell>,
        sample_rate: u32,
        period_size: usize,
    ) -> Output {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            thread::spawn(move || {
                let mut buf = vec![0.0f32; period_size * 2];
                let period =
                    Duration::from_secs_f64(period_size as f64 / sample_rate.max(1) as f64);
                while !stop.load(Ordering::Relaxed) {
                    synth.render(&mut buf, 2);
                    thread::sleep(period);
                }
            })
        };

        sink.report(LogLevel::Info, "Audio output started (null driver)");
        Output {
            driver_name: "null".to_string(),
            stop,
            thread: Some(thread),
        }
    }
}

impl AudioOutput for Output {
    fn driver_name(&self) -> String {
        self.driver_name.clone()
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Lists the output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut names = vec!["null".to_string()];
    for host_id in cpal::available_hosts() {
        let devices = match cpal::host_from_id(host_id)?.devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in devices {
            if device.supported_output_configs().is_err() {
                continue;
            }
            names.push(device.name()?);
        }
    }

    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::engine::{software::SinkCell, Settings as _, Synth as _};

    use super::super::{settings::Store, synth::Synth};
    use super::Output;

    #[test]
    fn test_null_driver_retires_released_voices() {
        let sink = Arc::new(SinkCell::new());
        let settings: Arc<dyn crate::engine::Settings> = Arc::new(Store::new());
        settings
            .set_str("audio.driver", "null")
            .expect("set should succeed");
        let synth = Arc::new(Synth::new(44100.0, 0.2, sink.clone()));

        let output = Output::new(&settings, synth.clone(), sink).expect("null driver");
        synth.handle_event(
            0,
            midly::MidiMessage::NoteOn {
                key: 60.into(),
                vel: 100.into(),
            },
        );
        synth.handle_event(
            0,
            midly::MidiMessage::NoteOff {
                key: 60.into(),
                vel: 0.into(),
            },
        );

        crate::test::eventually(
            || synth.active_voices() == 0,
            "released voice never retired",
        );
        drop(output);
    }

    #[test]
    fn test_unknown_driver_fails() {
        let sink = Arc::new(SinkCell::new());
        let settings: Arc<dyn crate::engine::Settings> = Arc::new(Store::new());
        settings
            .set_str("audio.driver", "bogus")
            .expect("set should succeed");
        let synth = Arc::new(Synth::new(44100.0, 0.2, sink.clone()));
        assert!(Output::new(&settings, synth, sink).is_err());
    }
}
