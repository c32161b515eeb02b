//! A MIDI playlist engine.
//!
//! [`MidiPlayer`] drives a playlist of [`SongResource`]s through a
//! [`Sequencer`] bound to a MIDI output port. A background playback thread
//! loads the current song, waits for it to end and advances; callers edit
//! the playlist and navigate concurrently through the same handle.

use std::sync::atomic::{AtomicBool, Ordering};

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod player;
pub mod playlist;
pub mod resource;
pub mod sequence;
pub mod sequencer;
mod worker;

#[cfg(test)]
mod test_support;

pub use config::PlayerConfig;
pub use device::{list_ports, MidiSink, MidirPorts, PortProvider};
pub use error::{EngineError, Result};
pub use player::{ErrorHandler, MidiPlayer, PlaybackState};
pub use playlist::Playlist;
pub use resource::{is_midi_file, scan_directory, SongResource};
pub use sequence::Sequence;
pub use sequencer::{LoopMode, Sequencer};

// Global shutdown flag for graceful Ctrl+C handling
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

pub fn set_shutdown_flag() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

pub fn should_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// `"2m05s"` above a minute, `"42s"` below; truncates
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let remaining_seconds = seconds % 60;

    if minutes > 0 {
        format!("{}m{:02}s", minutes, remaining_seconds)
    } else {
        format!("{}s", remaining_seconds)
    }
}
