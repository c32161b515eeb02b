//! Property-based tests for playlist editing
//!
//! Each song is a distinct file path, so an entry can be followed by value.

use e_midi_engine::{Playlist, SongResource};
use proptest::prelude::*;

fn songs(count: usize) -> Vec<SongResource> {
    (0..count)
        .map(|i| SongResource::file(format!("/music/song{:03}.mid", i)))
        .collect()
}

fn playlist(count: usize, current: usize) -> Playlist {
    let mut playlist = Playlist::new();
    playlist.add_all(songs(count));
    playlist.set_current(current);
    playlist
}

fn sorted(mut songs: Vec<SongResource>) -> Vec<SongResource> {
    songs.sort_by_key(|s| s.to_string());
    songs
}

/// 1..30 songs with a valid current index
fn arbitrary_playlist() -> impl Strategy<Value = (usize, usize)> {
    (1usize..30).prop_flat_map(|len| (Just(len), 0..len))
}

proptest! {
    /// Property: shuffling keeps the same songs and the same selected song
    #[test]
    fn shuffle_keeps_songs_and_selection((len, current) in arbitrary_playlist(), seed in any::<u64>()) {
        let mut list = playlist(len, current);
        let before = list.clone();

        prop_assert!(list.shuffle(Some(seed)));
        prop_assert_eq!(list.len(), len);
        prop_assert_eq!(sorted(list.songs().to_vec()), sorted(before.songs().to_vec()));
        prop_assert_eq!(list.current(), before.current());
    }

    /// Property: the same seed always gives the same order
    #[test]
    fn seeded_shuffle_is_reproducible((len, current) in arbitrary_playlist(), seed in any::<u64>()) {
        let mut first = playlist(len, current);
        let mut second = playlist(len, current);
        first.shuffle(Some(seed));
        second.shuffle(Some(seed));
        prop_assert_eq!(first, second);
    }

    /// Property: sorting orders by name and follows the selected song
    #[test]
    fn sort_keeps_selection((len, current) in arbitrary_playlist(), seed in any::<u64>()) {
        let mut list = playlist(len, current);
        list.shuffle(Some(seed));
        let selected = list.current().cloned();

        prop_assert!(list.sort());
        prop_assert_eq!(list.songs().to_vec(), songs(len));
        prop_assert_eq!(list.current().cloned(), selected);
    }

    /// Property: a moved block stays contiguous and in order, nothing is lost,
    /// and the selection follows its song
    #[test]
    fn rotate_matches_remove_then_insert(
        (len, current) in arbitrary_playlist(),
        a in 0usize..30,
        b in 0usize..30,
        position in 0usize..31,
    ) {
        let (start, end) = (a.min(b), a.max(b));
        let mut list = playlist(len, current);
        let selected = list.current().cloned();

        let moved = list.rotate(start, end, position).unwrap();
        let valid = end < len && position <= len && !(start..=end).contains(&position);
        prop_assert_eq!(moved, valid);

        let mut expected = songs(len);
        if valid {
            let block: Vec<_> = expected.drain(start..=end).collect();
            let insert_at = if position < start { position } else { position - block.len() };
            let tail = expected.split_off(insert_at);
            expected.extend(block);
            expected.extend(tail);
        }
        prop_assert_eq!(list.songs().to_vec(), expected);
        prop_assert_eq!(list.current().cloned(), selected);
    }

    /// Property: an inverted range is an error and changes nothing
    #[test]
    fn rotate_rejects_inverted_range((len, current) in arbitrary_playlist(), start in 1usize..30, position in 0usize..30) {
        let mut list = playlist(len, current);
        let before = list.clone();
        prop_assert!(list.rotate(start, start - 1, position).is_err());
        prop_assert_eq!(list, before);
    }

    /// Property: adding then removing the same song restores the playlist
    #[test]
    fn add_then_remove_restores((len, current) in arbitrary_playlist(), at in 0usize..31) {
        let mut list = playlist(len, current);
        let before = list.clone();
        let extra = SongResource::file("/music/extra.mid");

        if list.add_at(at, extra.clone()) {
            prop_assert!(at <= len);
            prop_assert_eq!(list.get(at), Some(&extra));
            prop_assert_eq!(list.current(), before.current());
            prop_assert!(list.remove(&extra));
        } else {
            prop_assert!(at > len);
        }
        prop_assert_eq!(list, before);
    }

    /// Property: removing songs before the selection keeps the selection
    #[test]
    fn remove_before_current_keeps_selection((len, current) in arbitrary_playlist(), index in 0usize..30) {
        let mut list = playlist(len, current);
        let selected = list.current().cloned();
        let removed = list.remove_at(index);
        prop_assert_eq!(removed, index < len);
        if removed && index != current {
            prop_assert_eq!(list.current().cloned(), selected);
        }
    }
}
