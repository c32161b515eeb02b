//! The sequencer handle
//!
//! Owns at most one open output port and a clock thread that walks the
//! loaded [`Sequence`] in real time. The clock reports the end of a song
//! through an [`EndOfTrackHandler`], called with the transport lock released
//! so the handler may take other locks.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::device::{MidiSink, PortProvider};
use crate::error::{EngineError, Result};
use crate::resource::SongResource;
use crate::sequence::Sequence;

/// Called from the clock thread with the load generation of the song that ended
pub type EndOfTrackHandler = Arc<dyn Fn(u64) + Send + Sync>;

const MAX_CLOCK_SLEEP: Duration = Duration::from_millis(10);

/// How many times a loaded song plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Once,
    /// Rewind at the end until stopped; no end-of-track is reported
    Continuous,
}

struct Transport {
    state: Mutex<TransportState>,
    wake: Condvar,
}

struct TransportState {
    sink: Option<Box<dyn MidiSink>>,
    sequence: Option<Arc<Sequence>>,
    loaded: Option<SongResource>,
    generation: u64,
    cursor: usize,
    // song position at the moment `started` was taken
    base_us: u64,
    started: Option<Instant>,
    tempo_factor: f32,
    loop_mode: LoopMode,
    closed: bool,
}

impl TransportState {
    fn position_us(&self) -> u64 {
        let position = match self.started {
            Some(at) => {
                self.base_us + (at.elapsed().as_micros() as f64 * self.tempo_factor as f64) as u64
            }
            None => self.base_us,
        };
        match &self.sequence {
            Some(seq) => position.min(seq.length_us()),
            None => position,
        }
    }

    fn rebase(&mut self) {
        if self.started.is_some() {
            self.base_us = self.position_us();
            self.started = Some(Instant::now());
        }
    }

    fn halt(&mut self) {
        if self.started.is_some() {
            self.base_us = self.position_us();
            self.started = None;
        }
        self.silence();
    }

    fn silence(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.all_notes_off();
        }
    }

    fn dispatch_until(&mut self, seq: &Sequence, now_us: u64) {
        let events = seq.events();
        while self.cursor < events.len() && events[self.cursor].time_us <= now_us {
            let event = &events[self.cursor];
            if let Some(sink) = self.sink.as_mut() {
                trace!("t={}us send {:02X?}", event.time_us, event.bytes);
                if let Err(e) = sink.send(&event.bytes) {
                    warn!("MIDI send failed: {}", e);
                }
            }
            self.cursor += 1;
        }
    }
}

fn clock_loop(transport: Arc<Transport>, on_end_of_track: Option<EndOfTrackHandler>) {
    let mut state = transport.state.lock();
    while !state.closed {
        let running = state.started.is_some();
        let Some(seq) = state.sequence.clone().filter(|_| running) else {
            transport.wake.wait(&mut state);
            continue;
        };

        let now = state.position_us();
        state.dispatch_until(&seq, now);

        if state.cursor >= seq.events().len() && now >= seq.length_us() {
            match state.loop_mode {
                // a song with no length cannot loop
                LoopMode::Continuous if seq.length_us() > 0 => {
                    trace!("Rewinding looped song");
                    state.silence();
                    state.cursor = 0;
                    state.base_us = 0;
                    state.started = Some(Instant::now());
                }
                _ => {
                    state.halt();
                    let generation = state.generation;
                    debug!("End of track (load #{})", generation);
                    if let Some(handler) = &on_end_of_track {
                        MutexGuard::unlocked(&mut state, || handler(generation));
                    }
                }
            }
            continue;
        }

        let next_due = seq
            .events()
            .get(state.cursor)
            .map(|e| e.time_us)
            .unwrap_or_else(|| seq.length_us());
        let real_us = next_due.saturating_sub(now) as f64 / state.tempo_factor as f64;
        let sleep = Duration::from_micros(real_us as u64).min(MAX_CLOCK_SLEEP);
        if !sleep.is_zero() {
            transport.wake.wait_for(&mut state, sleep);
        }
    }
    trace!("Clock thread finished");
}

/// Exclusive handle to the MIDI output device.
///
/// Settings (loop mode, tempo factor) survive close and are applied again
/// the next time the device is opened.
pub struct Sequencer {
    ports: Arc<dyn PortProvider>,
    on_end_of_track: Option<EndOfTrackHandler>,
    transport: Option<Arc<Transport>>,
    loop_mode: LoopMode,
    tempo_factor: f32,
    generation: u64,
}

impl Sequencer {
    pub fn new(ports: Arc<dyn PortProvider>) -> Self {
        Self {
            ports,
            on_end_of_track: None,
            transport: None,
            loop_mode: LoopMode::Once,
            tempo_factor: 1.0,
            generation: 0,
        }
    }

    /// Takes effect on the next open
    pub fn set_end_of_track_handler(&mut self, handler: EndOfTrackHandler) {
        self.on_end_of_track = Some(handler);
    }

    /// Acquire the device. Returns immediately if it is already open.
    pub fn open(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }

        let sink = match self.ports.open() {
            Ok(sink) => sink,
            Err(e) => {
                error!("Could not open MIDI device: {}", e);
                return Err(e);
            }
        };
        let transport = Arc::new(Transport {
            state: Mutex::new(TransportState {
                sink: Some(sink),
                sequence: None,
                loaded: None,
                generation: self.generation,
                cursor: 0,
                base_us: 0,
                started: None,
                tempo_factor: self.tempo_factor,
                loop_mode: self.loop_mode,
                closed: false,
            }),
            wake: Condvar::new(),
        });

        let clock_transport = Arc::clone(&transport);
        let handler = self.on_end_of_track.clone();
        thread::Builder::new()
            .name("e_midi-clock".to_string())
            .spawn(move || clock_loop(clock_transport, handler))
            .map_err(|e| {
                error!("Could not start sequencer clock: {}", e);
                EngineError::DeviceUnavailable(e.to_string())
            })?;

        info!("Sequencer opened");
        self.transport = Some(transport);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TransportState) -> R) -> Option<R> {
        let transport = self.transport.as_ref()?;
        let result = f(&mut transport.state.lock());
        transport.wake.notify_all();
        Some(result)
    }

    fn read_state<R>(&self, f: impl FnOnce(&TransportState) -> R) -> Option<R> {
        self.transport.as_ref().map(|t| f(&t.state.lock()))
    }

    /// Decode `resource` and start playing it from the top.
    ///
    /// Returns the load generation passed to the end-of-track handler when
    /// this song finishes. On failure the device is left stopped with
    /// nothing loaded, and an end-of-track still pending from the previous
    /// song no longer matches the current generation.
    pub fn load_and_play(&mut self, resource: &SongResource) -> Result<u64> {
        if self.transport.is_none() {
            return Err(EngineError::DeviceUnavailable("sequencer is not open".to_string()));
        }

        let decoded = resource.read_bytes().and_then(|bytes| {
            Sequence::parse(&bytes).map_err(|e| EngineError::load(resource, e))
        });
        let sequence = match decoded {
            Ok(seq) => Arc::new(seq),
            Err(e) => {
                warn!("{}", e);
                self.generation += 1;
                let generation = self.generation;
                self.with_state(|state| {
                    state.halt();
                    state.sequence = None;
                    state.loaded = None;
                    state.generation = generation;
                });
                return Err(e);
            }
        };

        self.generation += 1;
        let generation = self.generation;
        info!(
            "Playing {} ({} events, {})",
            resource,
            sequence.events().len(),
            crate::format_duration(sequence.length_us() / 1000)
        );
        self.with_state(|state| {
            state.halt();
            state.sequence = Some(sequence);
            state.loaded = Some(resource.clone());
            state.generation = generation;
            state.cursor = 0;
            state.base_us = 0;
            state.started = Some(Instant::now());
        });
        Ok(generation)
    }

    /// Resume the loaded song. A song sitting at its end restarts from the top.
    pub fn start(&mut self) -> bool {
        self.with_state(|state| {
            let Some(seq) = state.sequence.clone() else {
                return false;
            };
            if state.started.is_none() {
                if state.base_us >= seq.length_us() {
                    state.base_us = 0;
                    state.cursor = 0;
                }
                state.started = Some(Instant::now());
            }
            true
        })
        .unwrap_or(false)
    }

    /// Pause in place
    pub fn stop(&mut self) -> bool {
        self.with_state(|state| {
            let was_running = state.started.is_some();
            state.halt();
            was_running
        })
        .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.read_state(|state| state.started.is_some()).unwrap_or(false)
    }

    pub fn has_sequence(&self) -> bool {
        self.read_state(|state| state.sequence.is_some()).unwrap_or(false)
    }

    pub fn loaded_resource(&self) -> Option<SongResource> {
        self.read_state(|state| state.loaded.clone()).flatten()
    }

    /// Bumped by every load attempt, failed ones included
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        self.with_state(|state| state.loop_mode = mode);
    }

    pub fn tempo_factor(&self) -> f32 {
        self.tempo_factor
    }

    /// Playback speed relative to the file's own tempo; must be positive
    pub fn set_tempo_factor(&mut self, factor: f32) -> bool {
        if !factor.is_finite() || factor <= 0.0 {
            return false;
        }
        self.tempo_factor = factor;
        self.with_state(|state| {
            state.rebase();
            state.tempo_factor = factor;
        });
        true
    }

    pub fn position_us(&self) -> u64 {
        self.read_state(|state| state.position_us()).unwrap_or(0)
    }

    pub fn length_us(&self) -> u64 {
        self.read_state(|state| state.sequence.as_ref().map(|s| s.length_us()))
            .flatten()
            .unwrap_or(0)
    }

    /// Seek within the loaded song; clamps to its length
    pub fn set_position_us(&mut self, position_us: u64) -> bool {
        self.with_state(|state| {
            let Some(seq) = state.sequence.clone() else {
                return false;
            };
            let target = position_us.min(seq.length_us());
            state.silence();
            state.cursor = seq.index_at(target);
            state.base_us = target;
            if state.started.is_some() {
                state.started = Some(Instant::now());
            }
            true
        })
        .unwrap_or(false)
    }

    /// Stop and release the device. Safe to call when already closed.
    pub fn close(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        {
            let mut state = transport.state.lock();
            state.halt();
            state.sink = None;
            state.sequence = None;
            state.loaded = None;
            state.closed = true;
        }
        transport.wake.notify_all();
        info!("Sequencer closed");
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.close();
    }
}
