//! The playback coordinator
//!
//! [`MidiPlayer`] owns the playlist, the sequencer and the playback thread.
//! Every public method, the playback thread's read/play/wait cycle and the
//! end-of-track callback run under one monitor (a mutex plus a condvar), so
//! a caller editing the playlist can never interleave with the thread
//! picking the next song.

use std::cmp::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::PlayerConfig;
use crate::device::{MidirPorts, PortProvider};
use crate::error::{EngineError, Result};
use crate::format_duration;
use crate::playlist::Playlist;
use crate::resource::SongResource;
use crate::sequencer::{EndOfTrackHandler, LoopMode, Sequencer};
use crate::worker;

/// Receives a short description and the underlying error whenever a song
/// fails to load or the device cannot be acquired
pub type ErrorHandler = Arc<dyn Fn(&str, &EngineError) + Send + Sync>;

/// Derived transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Why the playback thread was woken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeReason {
    /// The song ended and the index moved on
    Advance,
    /// A caller moved the index
    Navigate,
    /// The song ended with nothing after it
    Exhausted,
    /// The device was closed
    Stop,
}

struct WorkerSlot {
    id: u64,
    handle: JoinHandle<()>,
}

pub(crate) struct PlayerState {
    pub(crate) playlist: Playlist,
    pub(crate) sequencer: Sequencer,
    worker: Option<WorkerSlot>,
    next_worker_id: u64,
    pub(crate) wake: Option<WakeReason>,
    song_looping: bool,
    playlist_looping: bool,
    pub(crate) closed: bool,
    error_handler: Option<ErrorHandler>,
}

impl PlayerState {
    fn worker_alive(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    pub(crate) fn is_current_worker(&self, id: u64) -> bool {
        self.worker.as_ref().map(|w| w.id == id).unwrap_or(false)
    }

    /// Drops the slot if it still belongs to `id`
    pub(crate) fn release_worker(&mut self, id: u64) -> bool {
        if self.is_current_worker(id) {
            self.worker = None;
            true
        } else {
            false
        }
    }

    fn is_active(&self) -> bool {
        self.worker_alive() && self.sequencer.is_open()
    }

    fn playback_state(&self) -> PlaybackState {
        if !(self.is_active() && self.sequencer.has_sequence()) {
            PlaybackState::Stopped
        } else if self.sequencer.is_running() {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    pub(crate) fn next_index(&self) -> Option<usize> {
        self.playlist.next_index(self.playlist_looping)
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<PlayerState>,
    pub(crate) wake: Condvar,
}

impl Shared {
    pub(crate) fn signal(&self, state: &mut PlayerState, reason: WakeReason) {
        state.wake = Some(reason);
        self.wake.notify_all();
    }

    /// Log, then hand the error to the callback with the monitor released
    pub(crate) fn report(
        &self,
        state: &mut MutexGuard<'_, PlayerState>,
        message: &str,
        err: &EngineError,
    ) {
        error!("{}: {}", message, err);
        if let Some(handler) = state.error_handler.clone() {
            MutexGuard::unlocked(state, || handler(message, err));
        }
    }

    /// Move to the next song and wake the playback thread.
    ///
    /// At the last song without playlist looping nothing moves; a forced
    /// advance then tells the thread the playlist is exhausted.
    fn advance(&self, state: &mut PlayerState, forced: bool) -> bool {
        match state.next_index() {
            Some(next) => {
                state.playlist.set_current(next);
                debug!("Advancing to song {}", next);
                let reason = if forced {
                    WakeReason::Advance
                } else {
                    WakeReason::Navigate
                };
                self.signal(state, reason);
                true
            }
            None => {
                if forced {
                    self.signal(state, WakeReason::Exhausted);
                }
                false
            }
        }
    }

    fn end_of_track(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.closed
            || !state.sequencer.is_open()
            || !state.sequencer.has_sequence()
            || state.sequencer.generation() != generation
        {
            debug!("Ignoring stale end of track (load #{})", generation);
            return;
        }
        if !self.advance(&mut state, true) {
            info!("Reached the end of the playlist");
        }
    }
}

/// The playback engine.
///
/// Construct one per playback session and hand references to whatever
/// drives it. Dropping it closes the device and joins the playback thread.
pub struct MidiPlayer {
    shared: Arc<Shared>,
}

impl MidiPlayer {
    pub fn new(ports: Arc<dyn PortProvider>, config: PlayerConfig) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let on_end_of_track: EndOfTrackHandler = Arc::new(move |generation| {
                if let Some(shared) = weak.upgrade() {
                    shared.end_of_track(generation);
                }
            });

            let mut sequencer = Sequencer::new(ports);
            sequencer.set_end_of_track_handler(on_end_of_track);
            sequencer.set_loop_mode(loop_mode(config.song_looping));
            if !sequencer.set_tempo_factor(config.tempo_factor) {
                warn!("Ignoring invalid tempo factor {}", config.tempo_factor);
            }

            Shared {
                state: Mutex::new(PlayerState {
                    playlist: Playlist::new(),
                    sequencer,
                    worker: None,
                    next_worker_id: 1,
                    wake: None,
                    song_looping: config.song_looping,
                    playlist_looping: config.playlist_looping,
                    closed: false,
                    error_handler: None,
                }),
                wake: Condvar::new(),
            }
        });
        MidiPlayer { shared }
    }

    /// A player on the platform MIDI output selected by `config.port`
    pub fn with_midir(config: PlayerConfig) -> Self {
        let ports = Arc::new(MidirPorts::new(config.client_name.clone(), config.port.clone()));
        Self::new(ports, config)
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &EngineError) + Send + Sync + 'static,
    {
        self.shared.state.lock().error_handler = Some(Arc::new(handler));
    }

    // ---- playlist queries ----

    /// Snapshot of the playlist
    pub fn resources(&self) -> Vec<SongResource> {
        self.shared.state.lock().playlist.songs().to_vec()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().playlist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().playlist.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.shared.state.lock().playlist.current_index()
    }

    pub fn current_resource(&self) -> Option<SongResource> {
        self.shared.state.lock().playlist.current().cloned()
    }

    pub fn is_current(&self, resource: &SongResource) -> bool {
        self.shared.state.lock().playlist.is_current(resource)
    }

    pub fn index_of(&self, resource: &SongResource) -> Option<usize> {
        self.shared.state.lock().playlist.index_of(resource)
    }

    // ---- transport ----

    /// Start the playback thread on the current song.
    ///
    /// If the thread is already running, the loaded song restarts from the
    /// top instead. Returns false on an empty playlist, a closed player, or
    /// when no device can be opened.
    pub fn start_playing(&self) -> bool {
        let mut state = self.shared.state.lock();
        self.start_locked(&mut state)
    }

    pub fn start_playing_at(&self, index: usize) -> bool {
        let mut state = self.shared.state.lock();
        self.start_at_locked(&mut state, index)
    }

    pub fn start_playing_resource(&self, resource: &SongResource) -> bool {
        let mut state = self.shared.state.lock();
        match state.playlist.index_of(resource) {
            Some(index) => self.start_at_locked(&mut state, index),
            None => {
                warn!("{} is not in the playlist", resource);
                false
            }
        }
    }

    /// Append `resources` and start playing the first of them
    pub fn start_playing_with(&self, resources: Vec<SongResource>) -> bool {
        let mut state = self.shared.state.lock();
        let first = state.playlist.len();
        if !state.playlist.add_all(resources) {
            return false;
        }
        self.start_at_locked(&mut state, first)
    }

    fn start_at_locked(&self, state: &mut MutexGuard<'_, PlayerState>, index: usize) -> bool {
        if !state.playlist.set_current(index) {
            warn!("No song at index {}", index);
            return false;
        }
        if state.is_active() {
            self.shared.signal(state, WakeReason::Navigate);
            return true;
        }
        self.start_locked(state)
    }

    fn start_locked(&self, state: &mut MutexGuard<'_, PlayerState>) -> bool {
        if state.closed {
            warn!("Player is closed");
            return false;
        }
        if state.playlist.is_empty() {
            info!("Nothing to play");
            return false;
        }
        if state.playlist.current().is_none() {
            state.playlist.set_current(0);
        }

        if state.is_active() {
            if state.sequencer.has_sequence() {
                state.sequencer.set_position_us(0);
                if !state.sequencer.is_running() {
                    state.sequencer.start();
                }
                info!("Restarting current song");
            }
            return true;
        }

        if let Err(e) = state.sequencer.open() {
            self.shared.report(state, "Could not start playback", &e);
            return false;
        }

        let id = state.next_worker_id;
        state.next_worker_id += 1;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("e_midi-playback-{}", id))
            .spawn(move || worker::run(shared, id));
        match spawned {
            Ok(handle) => {
                // a previous thread still winding down sees it was replaced
                state.worker = Some(WorkerSlot { id, handle });
                self.shared.wake.notify_all();
                true
            }
            Err(e) => {
                state.sequencer.close();
                let err = EngineError::Io(e);
                self.shared.report(state, "Could not start the playback thread", &err);
                false
            }
        }
    }

    /// Toggle between playing and paused. Returns false when nothing is loaded.
    pub fn pause_playing(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.sequencer.is_open() || !state.sequencer.has_sequence() {
            return false;
        }
        if state.sequencer.is_running() {
            state.sequencer.stop();
            info!("Paused");
        } else {
            state.sequencer.start();
            info!("Resumed");
        }
        true
    }

    /// Close the device and let the playback thread wind down
    pub fn stop_playing(&self) -> bool {
        let mut state = self.shared.state.lock();
        self.stop_locked(&mut state)
    }

    fn stop_locked(&self, state: &mut PlayerState) -> bool {
        if !state.sequencer.is_open() {
            return false;
        }
        state.sequencer.close();
        self.shared.signal(state, WakeReason::Stop);
        info!("Playback stopped");
        true
    }

    pub fn move_to_next_song(&self) -> bool {
        let mut state = self.shared.state.lock();
        self.shared.advance(&mut state, false)
    }

    pub fn move_to_previous_song(&self) -> bool {
        let mut state = self.shared.state.lock();
        match state.playlist.previous_index(state.playlist_looping) {
            Some(index) => {
                state.playlist.set_current(index);
                self.shared.signal(&mut state, WakeReason::Navigate);
                true
            }
            None => false,
        }
    }

    pub fn move_to_song(&self, index: usize) -> bool {
        let mut state = self.shared.state.lock();
        if !state.playlist.set_current(index) {
            return false;
        }
        self.shared.signal(&mut state, WakeReason::Navigate);
        true
    }

    pub fn move_to_resource(&self, resource: &SongResource) -> bool {
        let mut state = self.shared.state.lock();
        if !state.playlist.select(resource) {
            return false;
        }
        self.shared.signal(&mut state, WakeReason::Navigate);
        true
    }

    pub fn song_looping(&self) -> bool {
        self.shared.state.lock().song_looping
    }

    pub fn set_song_looping(&self, looping: bool) {
        let mut state = self.shared.state.lock();
        state.song_looping = looping;
        state.sequencer.set_loop_mode(loop_mode(looping));
    }

    pub fn playlist_looping(&self) -> bool {
        self.shared.state.lock().playlist_looping
    }

    pub fn set_playlist_looping(&self, looping: bool) {
        self.shared.state.lock().playlist_looping = looping;
    }

    pub fn tempo_factor(&self) -> f32 {
        self.shared.state.lock().sequencer.tempo_factor()
    }

    /// Must be a positive, finite factor
    pub fn set_tempo_factor(&self, factor: f32) -> bool {
        self.shared.state.lock().sequencer.set_tempo_factor(factor)
    }

    pub fn position_us(&self) -> u64 {
        self.shared.state.lock().sequencer.position_us()
    }

    pub fn set_position_us(&self, position_us: u64) -> bool {
        self.shared.state.lock().sequencer.set_position_us(position_us)
    }

    /// The song currently loaded in the device
    pub fn loaded_resource(&self) -> Option<SongResource> {
        self.shared.state.lock().sequencer.loaded_resource()
    }

    /// `"name (position / length)"` for the loaded song
    pub fn song_info(&self) -> Option<String> {
        let state = self.shared.state.lock();
        let resource = state.sequencer.loaded_resource()?;
        Some(format!(
            "{} ({} / {})",
            resource.name(),
            format_duration(state.sequencer.position_us() / 1000),
            format_duration(state.sequencer.length_us() / 1000)
        ))
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.shared.state.lock().playback_state()
    }

    pub fn is_playing(&self) -> bool {
        self.playback_state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.playback_state() == PlaybackState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.playback_state() == PlaybackState::Stopped
    }

    // ---- playlist edits ----

    pub fn add(&self, resource: SongResource) -> bool {
        self.shared.state.lock().playlist.add(resource)
    }

    pub fn add_at(&self, index: usize, resource: SongResource) -> bool {
        self.shared.state.lock().playlist.add_at(index, resource)
    }

    pub fn add_all(&self, resources: Vec<SongResource>) -> bool {
        self.shared.state.lock().playlist.add_all(resources)
    }

    pub fn add_all_at(&self, index: usize, resources: Vec<SongResource>) -> bool {
        self.shared.state.lock().playlist.add_all_at(index, resources)
    }

    /// Removing the song that is playing stops playback first
    pub fn remove(&self, index: usize) -> bool {
        let mut state = self.shared.state.lock();
        self.remove_locked(&mut state, index)
    }

    pub fn remove_resource(&self, resource: &SongResource) -> bool {
        let mut state = self.shared.state.lock();
        match state.playlist.index_of(resource) {
            Some(index) => self.remove_locked(&mut state, index),
            None => false,
        }
    }

    fn remove_locked(&self, state: &mut PlayerState, index: usize) -> bool {
        if index >= state.playlist.len() {
            return false;
        }
        if index == state.playlist.current_index() && state.is_active() {
            self.stop_locked(state);
        }
        state.playlist.remove_at(index)
    }

    /// Remove several songs, highest index first. True only if all were removed.
    pub fn remove_all(&self, indexes: &[usize]) -> bool {
        let mut state = self.shared.state.lock();
        let current = state.playlist.current_index();
        if indexes.contains(&current) && state.is_active() {
            self.stop_locked(&mut state);
        }
        state.playlist.remove_all(indexes)
    }

    pub fn clear(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.playlist.is_empty() {
            return false;
        }
        if state.is_active() {
            self.stop_locked(&mut state);
        }
        state.playlist.clear()
    }

    /// Move songs `start..=end` to land before `position`
    pub fn move_songs_to(&self, start: usize, end: usize, position: usize) -> Result<bool> {
        self.shared.state.lock().playlist.rotate(start, end, position)
    }

    pub fn shuffle(&self, seed: Option<u64>) -> bool {
        self.shared.state.lock().playlist.shuffle(seed)
    }

    pub fn sort(&self) -> bool {
        self.shared.state.lock().playlist.sort()
    }

    pub fn sort_by<F>(&self, compare: F) -> bool
    where
        F: FnMut(&SongResource, &SongResource) -> Ordering,
    {
        self.shared.state.lock().playlist.sort_by(compare)
    }

    // ---- lifecycle ----

    /// Release the device and join the playback thread. Safe to call twice.
    pub fn close(&self) {
        let handle = {
            let mut state = self.shared.state.lock();
            if state.closed && state.worker.is_none() && !state.sequencer.is_open() {
                return;
            }
            state.closed = true;
            state.sequencer.close();
            self.shared.signal(&mut state, WakeReason::Stop);
            state.worker.take().map(|w| w.handle)
        };
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Playback thread panicked");
            }
        }
        info!("Player closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl Drop for MidiPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

fn loop_mode(song_looping: bool) -> LoopMode {
    if song_looping {
        LoopMode::Continuous
    } else {
        LoopMode::Once
    }
}
