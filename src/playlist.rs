//! Ordered song list with a tracked current position
//!
//! Every mutation keeps the current index on the same song it pointed at
//! before, as long as that song is still in the list. An index equal to
//! `len()` means nothing is selected.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, SeedableRng};

use crate::error::{EngineError, Result};
use crate::resource::SongResource;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    songs: Vec<SongResource>,
    current: usize,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn songs(&self) -> &[SongResource] {
        &self.songs
    }

    pub fn get(&self, index: usize) -> Option<&SongResource> {
        self.songs.get(index)
    }

    /// May be out of range; see [`Playlist::current`]
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> Option<&SongResource> {
        self.songs.get(self.current)
    }

    pub fn is_current(&self, resource: &SongResource) -> bool {
        self.current() == Some(resource)
    }

    pub fn index_of(&self, resource: &SongResource) -> Option<usize> {
        self.songs.iter().position(|s| s == resource)
    }

    pub fn set_current(&mut self, index: usize) -> bool {
        if index < self.songs.len() {
            self.current = index;
            true
        } else {
            false
        }
    }

    /// Select the first occurrence of `resource`
    pub fn select(&mut self, resource: &SongResource) -> bool {
        match self.index_of(resource) {
            Some(index) => self.set_current(index),
            None => false,
        }
    }

    pub fn add(&mut self, resource: SongResource) -> bool {
        let end = self.songs.len();
        self.add_at(end, resource)
    }

    /// Insert before `index`; `index == len()` appends
    pub fn add_at(&mut self, index: usize, resource: SongResource) -> bool {
        self.add_all_at(index, vec![resource])
    }

    pub fn add_all(&mut self, resources: Vec<SongResource>) -> bool {
        let end = self.songs.len();
        self.add_all_at(end, resources)
    }

    /// All-or-nothing: one invalid resource rejects the whole batch
    pub fn add_all_at(&mut self, index: usize, resources: Vec<SongResource>) -> bool {
        if resources.is_empty() || index > self.songs.len() {
            return false;
        }
        if resources.iter().any(|r| !r.is_valid()) {
            return false;
        }
        let count = resources.len();
        let had_selection = self.current < self.songs.len();
        let tail = self.songs.split_off(index);
        self.songs.extend(resources);
        self.songs.extend(tail);
        if had_selection && index <= self.current {
            self.current += count;
        }
        true
    }

    /// Removing the current song leaves the index on whatever slides into its slot
    pub fn remove_at(&mut self, index: usize) -> bool {
        if index >= self.songs.len() {
            return false;
        }
        let had_selection = self.current < self.songs.len();
        self.songs.remove(index);
        if had_selection && index < self.current {
            self.current -= 1;
        }
        true
    }

    /// Remove the first occurrence of `resource`
    pub fn remove(&mut self, resource: &SongResource) -> bool {
        match self.index_of(resource) {
            Some(index) => self.remove_at(index),
            None => false,
        }
    }

    /// Removes highest index first so earlier removals don't shift later ones.
    /// Returns true only if every index named a distinct, existing song.
    pub fn remove_all(&mut self, indexes: &[usize]) -> bool {
        if indexes.is_empty() {
            return false;
        }
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let requested = sorted.len();
        sorted.dedup();
        let mut all_removed = sorted.len() == requested;
        for index in sorted {
            all_removed &= self.remove_at(index);
        }
        all_removed
    }

    pub fn clear(&mut self) -> bool {
        if self.songs.is_empty() {
            return false;
        }
        self.songs.clear();
        self.current = 0;
        true
    }

    /// Move the block `start..=end` so it lands before `position`.
    ///
    /// `position` indexes the list as it is before the move. Returns
    /// `Ok(false)` without touching anything when `position` falls inside the
    /// block or any bound is out of range.
    pub fn rotate(&mut self, start: usize, end: usize, position: usize) -> Result<bool> {
        if start > end {
            return Err(EngineError::InvalidArgument(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        let len = self.songs.len();
        if end >= len || position > len || (start..=end).contains(&position) {
            return Ok(false);
        }

        let block = end - start + 1;
        let low = start.min(position);
        let high = (end + 1).max(position);
        let window = &mut self.songs[low..high];
        if position < start {
            window.rotate_right(block);
        } else {
            window.rotate_left(block);
        }

        if self.current < len {
            self.current = moved_index(self.current, start, end, position);
        }
        Ok(true)
    }

    /// Returns false on an empty playlist. A seed makes the order reproducible.
    pub fn shuffle(&mut self, seed: Option<u64>) -> bool {
        if self.songs.is_empty() {
            return false;
        }
        self.reorder(|entries| match seed {
            Some(seed) => entries.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => entries.shuffle(&mut thread_rng()),
        });
        true
    }

    /// Sort by display form
    pub fn sort(&mut self) -> bool {
        self.sort_by(|a, b| a.to_string().cmp(&b.to_string()))
    }

    /// Stable sort with a caller-supplied ordering
    pub fn sort_by<F>(&mut self, mut compare: F) -> bool
    where
        F: FnMut(&SongResource, &SongResource) -> Ordering,
    {
        if self.songs.is_empty() {
            return false;
        }
        self.reorder(|entries| entries.sort_by(|(_, a), (_, b)| compare(a, b)));
        true
    }

    // Reorders songs tagged with their old index so the selection follows the
    // exact entry, even when the same song appears more than once.
    fn reorder(&mut self, f: impl FnOnce(&mut Vec<(usize, SongResource)>)) {
        let mut entries: Vec<(usize, SongResource)> = self.songs.drain(..).enumerate().collect();
        f(&mut entries);
        let len = entries.len();
        let old_current = self.current;
        if old_current < len {
            if let Some(new_index) = entries.iter().position(|(old, _)| *old == old_current) {
                self.current = new_index;
            }
        }
        self.songs = entries.into_iter().map(|(_, song)| song).collect();
    }

    /// Index after the current one; wraps only when `looping`
    pub fn next_index(&self, looping: bool) -> Option<usize> {
        let len = self.songs.len();
        if len == 0 {
            return None;
        }
        let next = self.current.saturating_add(1);
        if next < len {
            Some(next)
        } else if looping {
            Some(0)
        } else {
            None
        }
    }

    /// Index before the current one; wraps only when `looping`
    pub fn previous_index(&self, looping: bool) -> Option<usize> {
        let len = self.songs.len();
        if len == 0 {
            return None;
        }
        if self.current >= len {
            Some(len - 1)
        } else if self.current > 0 {
            Some(self.current - 1)
        } else if looping {
            Some(len - 1)
        } else {
            None
        }
    }
}

fn moved_index(index: usize, start: usize, end: usize, position: usize) -> usize {
    let block = end - start + 1;
    if position < start {
        if (start..=end).contains(&index) {
            index - (start - position)
        } else if (position..start).contains(&index) {
            index + block
        } else {
            index
        }
    } else if (start..=end).contains(&index) {
        index + (position - end - 1)
    } else if (end + 1..position).contains(&index) {
        index - block
    } else {
        index
    }
}
