//! Helpers shared by the integration tests; the same fixtures the unit
//! tests use, rebuilt on the public API

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use e_midi_engine::{EngineError, MidiSink, PortProvider, Result, SongResource};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use parking_lot::Mutex;

pub fn write_smf(header: Header, tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
    let mut smf = Smf::new(header);
    smf.tracks = tracks;
    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).unwrap();
    bytes
}

/// One note lasting `length_ms`; one tick is one millisecond
pub fn song_bytes(length_ms: u32) -> Vec<u8> {
    let channel = u4::new(0);
    let track = vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn {
                    key: u7::new(60),
                    vel: u7::new(100),
                },
            },
        },
        TrackEvent {
            delta: u28::new(length_ms),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOff {
                    key: u7::new(60),
                    vel: u7::new(0),
                },
            },
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ];
    write_smf(
        Header::new(Format::SingleTrack, Timing::Metrical(u15::new(1000))),
        vec![track],
    )
}

/// A valid file holding nothing but the end-of-track marker
pub fn empty_song_bytes() -> Vec<u8> {
    let track = vec![TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }];
    write_smf(
        Header::new(Format::SingleTrack, Timing::Metrical(u15::new(1000))),
        vec![track],
    )
}

pub fn song(name: &str, length_ms: u32) -> SongResource {
    SongResource::memory(name, song_bytes(length_ms))
}

/// Records every message sent through any sink it opened
#[derive(Default)]
pub struct RecordingPorts {
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub opened: AtomicUsize,
    pub unavailable: AtomicBool,
}

impl RecordingPorts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn note_ons(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.len() == 3 && m[0] & 0xF0 == 0x90 && m[2] > 0)
            .count()
    }
}

impl PortProvider for RecordingPorts {
    fn open(&self) -> Result<Box<dyn MidiSink>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::DeviceUnavailable("test port offline".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingSink {
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct RecordingSink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MidiSink for RecordingSink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.sent.lock().push(message.to_vec());
        Ok(())
    }
}

/// Poll `condition` until it holds or ten seconds pass
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
