use std::collections::VecDeque;

use crate::track::Track;

/// Pending tracks plus a bounded ring of previously played ones.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    pending: VecDeque<Track>,
    history: VecDeque<Track>,
    history_limit: usize,
}

impl PlaybackQueue {
    pub fn new(history_limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            history: VecDeque::with_capacity(history_limit),
            history_limit,
        }
    }

    pub fn extend<I: IntoIterator<Item = Track>>(&mut self, tracks: I) {
        self.pending.extend(tracks);
    }

    pub fn pop_next(&mut self) -> Option<Track> {
        self.pending.pop_front()
    }

    /// Puts a track back at the head of the pending list.
    pub fn push_front(&mut self, track: Track) {
        self.pending.push_front(track);
    }

    /// Records a superseded track, evicting the oldest entry past the limit.
    pub fn remember(&mut self, track: Track) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(track);
    }

    pub fn pop_previous(&mut self) -> Option<Track> {
        self.history.pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Track> {
        self.pending.iter()
    }

    /// Oldest first, most recent last.
    pub fn history(&self) -> impl Iterator<Item = &Track> {
        self.history.iter()
    }
}
