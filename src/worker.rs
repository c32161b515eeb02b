//! The playback thread
//!
//! One thread per playback session. It loads the song at the playlist's
//! current index, then sleeps on the player's condvar until the song ends,
//! a caller navigates, or the device is closed. The device is opened by
//! whoever spawns the thread; once it is closed the thread only winds down.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::MutexGuard;

use crate::player::{PlayerState, Shared, WakeReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Closed,
    Replaced,
    DeviceClosed,
    NoSong,
    Exhausted,
}

pub(crate) fn run(shared: Arc<Shared>, id: u64) {
    info!("Playback thread #{} started", id);
    let mut state = shared.state.lock();
    let exit = play(&shared, &mut state, id);
    // a newer thread owns the device if we were replaced
    if state.release_worker(id) {
        state.sequencer.close();
    }
    info!("Playback thread #{} finished ({:?})", id, exit);
}

fn play(shared: &Shared, state: &mut MutexGuard<'_, PlayerState>, id: u64) -> Exit {
    let mut failures = 0usize;
    loop {
        if state.closed {
            return Exit::Closed;
        }
        if !state.is_current_worker(id) {
            return Exit::Replaced;
        }
        if !state.sequencer.is_open() {
            return Exit::DeviceClosed;
        }
        state.wake = None;

        let Some(resource) = state.playlist.current().cloned() else {
            debug!("No song at index {}", state.playlist.current_index());
            return Exit::NoSong;
        };

        if let Err(e) = state.sequencer.load_and_play(&resource) {
            failures += 1;
            let at = state.playlist.current_index();
            let skip_to = if failures < state.playlist.len() {
                state.next_index().filter(|&next| next != at)
            } else {
                None
            };
            if let Some(next) = skip_to {
                warn!("Skipping {} after load failure", resource);
                state.playlist.set_current(next);
            }
            shared.report(state, &format!("Could not play {}", resource), &e);
            if skip_to.is_none() {
                return Exit::Exhausted;
            }
            continue;
        }
        failures = 0;

        while state.wake.is_none() && !state.closed && state.is_current_worker(id) {
            shared.wake.wait(state);
        }
        match state.wake.take() {
            Some(WakeReason::Exhausted) => return Exit::Exhausted,
            Some(reason) => debug!("Playback thread #{} woke: {:?}", id, reason),
            None => {}
        }
    }
}
