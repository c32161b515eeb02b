//! Decoding standard MIDI files into a playable timeline
//!
//! All tracks are merged into one list of raw MIDI messages stamped with
//! their absolute time in microseconds. Tempo changes from any track apply
//! to every track, the way a hardware sequencer treats a format 1 file.

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

/// Microseconds per quarter note until the first tempo event (120 BPM)
const DEFAULT_TEMPO_US: u32 = 500_000;

/// A raw MIDI message and the moment it is due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedMessage {
    pub time_us: u64,
    pub bytes: Vec<u8>,
}

/// A decoded song ready for the sequencer
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    events: Vec<TimedMessage>,
    length_us: u64,
    track_count: usize,
}

enum Pending {
    Message(Vec<u8>),
    Tempo(u32),
    Marker,
}

impl Sequence {
    /// Parse a standard MIDI file
    pub fn parse(data: &[u8]) -> Result<Self, midly::Error> {
        let smf = Smf::parse(data)?;
        Ok(Self::from_smf(&smf))
    }

    pub fn from_smf(smf: &Smf) -> Self {
        // (absolute tick, event); stable sort keeps track order for ties
        let mut merged: Vec<(u64, Pending)> = Vec::new();
        for track in smf.tracks.iter() {
            let mut abs_ticks = 0u64;
            for event in track.iter() {
                abs_ticks += event.delta.as_int() as u64;
                let pending = match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        Pending::Message(encode_channel_message(channel.as_int(), message))
                    }
                    TrackEventKind::SysEx(data) => {
                        let mut bytes = Vec::with_capacity(data.len() + 1);
                        bytes.push(0xF0);
                        bytes.extend_from_slice(data);
                        Pending::Message(bytes)
                    }
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Pending::Tempo(tempo.as_int()),
                    // End of track and other metas only stretch the length
                    TrackEventKind::Meta(_) | TrackEventKind::Escape(_) => Pending::Marker,
                };
                merged.push((abs_ticks, pending));
            }
        }
        merged.sort_by_key(|(tick, _)| *tick);

        let clock = TickClock::new(smf.header.timing);
        let mut events = Vec::new();
        let mut tempo_us = DEFAULT_TEMPO_US;
        let mut last_tick = 0u64;
        let mut last_us = 0u64;
        for (tick, pending) in merged {
            last_us += clock.ticks_to_us(tick - last_tick, tempo_us);
            last_tick = tick;
            match pending {
                Pending::Message(bytes) => events.push(TimedMessage { time_us: last_us, bytes }),
                Pending::Tempo(tempo) if tempo > 0 => tempo_us = tempo,
                Pending::Tempo(_) | Pending::Marker => {}
            }
        }

        Sequence {
            events,
            length_us: last_us,
            track_count: smf.tracks.len(),
        }
    }

    pub fn events(&self) -> &[TimedMessage] {
        &self.events
    }

    /// Time of the last event of any kind, end-of-track included
    pub fn length_us(&self) -> u64 {
        self.length_us
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// Index of the first message due at or after `position_us`
    pub fn index_at(&self, position_us: u64) -> usize {
        self.events.partition_point(|e| e.time_us < position_us)
    }
}

struct TickClock {
    ticks_per_q: u64,
    // Some for SMPTE timing, where tempo events do not apply
    us_per_tick: Option<f64>,
}

impl TickClock {
    fn new(timing: Timing) -> Self {
        match timing {
            Timing::Metrical(ticks) => TickClock {
                ticks_per_q: (ticks.as_int() as u64).max(1),
                us_per_tick: None,
            },
            Timing::Timecode(fps, subframes) => {
                let ticks_per_second = (fps.as_f32() as f64 * subframes as f64).max(1.0);
                TickClock {
                    ticks_per_q: 1,
                    us_per_tick: Some(1_000_000.0 / ticks_per_second),
                }
            }
        }
    }

    fn ticks_to_us(&self, ticks: u64, tempo_us: u32) -> u64 {
        match self.us_per_tick {
            Some(us) => (ticks as f64 * us) as u64,
            None => ticks * tempo_us as u64 / self.ticks_per_q,
        }
    }
}

fn encode_channel_message(channel: u8, message: MidiMessage) -> Vec<u8> {
    let ch = channel & 0x0F;
    match message {
        MidiMessage::NoteOff { key, vel } => vec![0x80 | ch, key.as_int(), vel.as_int()],
        MidiMessage::NoteOn { key, vel } => vec![0x90 | ch, key.as_int(), vel.as_int()],
        MidiMessage::Aftertouch { key, vel } => vec![0xA0 | ch, key.as_int(), vel.as_int()],
        MidiMessage::Controller { controller, value } => {
            vec![0xB0 | ch, controller.as_int(), value.as_int()]
        }
        MidiMessage::ProgramChange { program } => vec![0xC0 | ch, program.as_int()],
        MidiMessage::ChannelAftertouch { vel } => vec![0xD0 | ch, vel.as_int()],
        MidiMessage::PitchBend { bend } => {
            let raw = bend.0.as_int();
            vec![0xE0 | ch, (raw & 0x7F) as u8, (raw >> 7) as u8]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{song_bytes, write_smf};
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Fps, Header, TrackEvent};

    fn ev(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn note_on(key: u8) -> TrackEventKind<'static> {
        TrackEventKind::Midi {
            channel: u4::new(1),
            message: MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(100),
            },
        }
    }

    #[test]
    fn test_song_length_and_note_times() {
        let seq = Sequence::parse(&song_bytes(250)).unwrap();
        assert_eq!(seq.length_us(), 250_000);
        let times: Vec<u64> = seq.events().iter().map(|e| e.time_us).collect();
        assert_eq!(times, vec![0, 250_000]);
        assert_eq!(seq.events()[0].bytes, vec![0x90, 60, 100]);
    }

    #[test]
    fn test_tempo_change_applies_from_its_tick() {
        // 480 ticks per quarter, default 120 BPM for one beat, then 60 BPM
        let track = vec![
            ev(0, note_on(60)),
            ev(480, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000)))),
            ev(480, note_on(62)),
            ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ];
        let header = Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480)));
        let seq = Sequence::parse(&write_smf(header, vec![track])).unwrap();

        let times: Vec<u64> = seq.events().iter().map(|e| e.time_us).collect();
        assert_eq!(times, vec![0, 1_500_000]);
        assert_eq!(seq.events()[1].bytes, vec![0x91, 62, 100]);
        assert_eq!(seq.length_us(), 1_500_000);
    }

    #[test]
    fn test_tracks_are_merged_with_shared_tempo_map() {
        let conductor = vec![
            ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(250_000)))),
            ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ];
        let melody = vec![
            ev(96, note_on(64)),
            ev(96, note_on(65)),
            ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ];
        let header = Header::new(Format::Parallel, Timing::Metrical(u15::new(96)));
        let seq = Sequence::parse(&write_smf(header, vec![conductor, melody])).unwrap();

        assert_eq!(seq.track_count(), 2);
        let times: Vec<u64> = seq.events().iter().map(|e| e.time_us).collect();
        assert_eq!(times, vec![250_000, 500_000]);
    }

    #[test]
    fn test_timecode_ignores_tempo() {
        // 25 fps * 40 subframes = 1000 ticks per second
        let track = vec![
            ev(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000)))),
            ev(500, note_on(60)),
            ev(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ];
        let header = Header::new(Format::SingleTrack, Timing::Timecode(Fps::Fps25, 40));
        let seq = Sequence::parse(&write_smf(header, vec![track])).unwrap();
        assert_eq!(seq.events()[0].time_us, 500_000);
    }

    #[test]
    fn test_channel_message_encoding() {
        use midly::num::u14;
        use midly::PitchBend;
        assert_eq!(
            encode_channel_message(2, MidiMessage::ProgramChange { program: u7::new(5) }),
            vec![0xC2, 5]
        );
        assert_eq!(
            encode_channel_message(0, MidiMessage::PitchBend { bend: PitchBend(u14::new(0x2000)) }),
            vec![0xE0, 0x00, 0x40]
        );
    }

    #[test]
    fn test_index_at_finds_first_due_event() {
        let seq = Sequence::parse(&song_bytes(100)).unwrap();
        assert_eq!(seq.index_at(0), 0);
        assert_eq!(seq.index_at(1), 1);
        assert_eq!(seq.index_at(100_000), 1);
        assert_eq!(seq.index_at(100_001), 2);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Sequence::parse(b"definitely not midi").is_err());
    }
}
