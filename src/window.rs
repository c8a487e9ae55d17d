//! Sample-level sliding window with overlap.
//!
//! The window length need not be a whole number of chunks: when a chunk
//! straddles the window boundary, the tail goes into a small stash and is
//! consumed first on the next refill. The builder runs entirely inside the
//! consumer thread, so there are no locks here.

use std::collections::VecDeque;

use thiserror::Error;

use crate::types::{Chunk, SsvepDecision, TestFreq, NUM_CH_CHUNK, NUM_SAMPLES_CHUNK};
use crate::types::{WINDOW_HOP_SCANS, WINDOW_SCANS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window length {win_len} is not a multiple of {n_ch} channels")]
    NotChannelAligned { win_len: usize, n_ch: usize },
    #[error("hop {hop} exceeds window length {win_len}")]
    HopTooLarge { hop: usize, win_len: usize },
    #[error("stash overflow: {0} samples would exceed one chunk")]
    StashOverflow(usize),
}

pub struct SlidingWindow {
    win_len: usize,
    hop: usize,
    ring: VecDeque<f32>,
    stash: [f32; NUM_SAMPLES_CHUNK],
    stash_len: usize,

    /// Monotonic index of the window being built, set by the consumer.
    pub tick: u64,
    pub test_freq: TestFreq,
    pub has_label: bool,
    pub is_trimmed: bool,
    pub trimmed: Vec<f32>,
    pub decision: SsvepDecision,
    pub is_artifactual: bool,
}

impl SlidingWindow {
    /// Window of `win_scans` scans advancing by `hop_scans` scans.
    pub fn new(win_scans: usize, hop_scans: usize) -> Result<Self, WindowError> {
        let win_len = win_scans * NUM_CH_CHUNK;
        let hop = hop_scans * NUM_CH_CHUNK;
        if win_len == 0 || win_len % NUM_CH_CHUNK != 0 {
            return Err(WindowError::NotChannelAligned {
                win_len,
                n_ch: NUM_CH_CHUNK,
            });
        }
        if hop > win_len {
            return Err(WindowError::HopTooLarge { hop, win_len });
        }
        Ok(Self {
            win_len,
            hop,
            ring: VecDeque::with_capacity(win_len),
            stash: [0.0; NUM_SAMPLES_CHUNK],
            stash_len: 0,
            tick: 0,
            test_freq: TestFreq::None,
            has_label: false,
            is_trimmed: false,
            trimmed: Vec::new(),
            decision: SsvepDecision::None,
            is_artifactual: false,
        })
    }

    pub fn default_geometry() -> Self {
        // geometry constants are validated at construction; defaults can't fail
        Self::new(WINDOW_SCANS, WINDOW_HOP_SCANS).unwrap_or_else(|e| {
            unreachable!("default window geometry rejected: {e}");
        })
    }

    pub fn win_len(&self) -> usize {
        self.win_len
    }

    pub fn hop_len(&self) -> usize {
        self.hop
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.len() >= self.win_len
    }

    /// Samples still needed to complete the current window.
    pub fn remaining(&self) -> usize {
        self.win_len - self.ring.len()
    }

    pub fn stash_len(&self) -> usize {
        self.stash_len
    }

    /// Discards one hop's worth of the oldest samples.
    pub fn slide(&mut self) {
        let n = self.hop.min(self.ring.len());
        self.ring.drain(..n);
    }

    /// Moves as much of the stash as fits into the window; compacts the
    /// leftover to the front. Returns how many samples were taken.
    pub fn take_from_stash(&mut self) -> usize {
        let take = self.stash_len.min(self.remaining());
        for &v in &self.stash[..take] {
            self.ring.push_back(v);
        }
        self.stash.copy_within(take..self.stash_len, 0);
        self.stash_len -= take;
        take
    }

    /// Appends a chunk's payload, stashing whatever does not fit. Must only
    /// be called with an empty stash (the refill loop drains it first).
    pub fn accept_chunk(&mut self, chunk: &Chunk) -> Result<(), WindowError> {
        let payload = chunk.num_ch * chunk.num_scans;
        let take = payload.min(self.remaining());
        for &v in &chunk.data[..take] {
            self.ring.push_back(v);
        }
        let leftover = payload - take;
        if self.stash_len + leftover > NUM_SAMPLES_CHUNK {
            return Err(WindowError::StashOverflow(self.stash_len + leftover));
        }
        self.stash[self.stash_len..self.stash_len + leftover]
            .copy_from_slice(&chunk.data[take..payload]);
        self.stash_len += leftover;
        Ok(())
    }

    /// Copies the full window contents into `out` (cleared first).
    pub fn snapshot_into(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend(self.ring.iter().copied());
    }

    /// Builds the trimmed snapshot: drops `front` samples from the start and
    /// `back` from the end. Sets `is_trimmed`.
    pub fn trim_snapshot(&mut self, front: usize, back: usize) {
        self.trimmed.clear();
        let len = self.ring.len();
        if front + back >= len {
            self.is_trimmed = false;
            return;
        }
        self.trimmed
            .extend(self.ring.iter().skip(front).take(len - front - back));
        self.is_trimmed = true;
    }

    /// Clears the per-window labelling before state-dependent handling.
    pub fn reset_labels(&mut self) {
        self.is_trimmed = false;
        self.has_label = false;
        self.test_freq = TestFreq::None;
        self.is_artifactual = false;
    }
}
