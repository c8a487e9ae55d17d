// src/acq/mod.rs
pub mod synthetic;
pub mod unicorn;

pub use synthetic::{SyntheticAcquisition, SynthConfig, WaveComponent};
pub use unicorn::UnicornDriver;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use crate::ring::ChunkRing;
use crate::state_store::{ChannelConfig, StateStore};
use crate::types::{Chunk, NUM_CH_CHUNK, NUM_SCANS_CHUNK};

/// Acquisition backend interface. One provider instance feeds the producer
/// thread; the real Unicorn driver and the synthetic generator both
/// implement it, chosen at startup.
pub trait AcqProvider {
    fn init(&mut self) -> bool;
    fn start(&mut self, test_mode: bool) -> bool;
    fn stop_and_close(&mut self) -> bool;
    /// Fills `dest` with `num_scans * num_channels` floats, time-major
    /// interleaved, in microvolts.
    fn get_data(&mut self, num_scans: usize, dest: &mut [f32]) -> bool;
    fn num_channels(&self) -> usize;
    fn channel_labels(&self) -> Vec<String>;
    /// Synthetic backends drive their test signal from this; hardware may
    /// ignore it.
    fn set_active_stimulus_hz(&mut self, _hz: f64) {}
}

/// Per-chunk preprocessing seam. The FIR bank that fills it lives outside
/// this crate.
pub trait ChunkFilter: Send {
    fn process(&mut self, chunk: &mut Chunk);
}

// give up after this many get_data failures in a row
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 3;

fn epoch_ms_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Acquisition producer loop: pulls fixed-size chunks from the provider,
/// optionally preprocesses them, publishes the latest chunk for the UI and
/// pushes into the SPSC ring. Closes the ring on the way out so the
/// consumer terminates with it.
pub fn producer_thread(
    ring: &ChunkRing<Chunk>,
    store: &StateStore,
    mut provider: Box<dyn AcqProvider + Send>,
    mut filter: Option<Box<dyn ChunkFilter>>,
    test_mode: bool,
) {
    info!(target: "producer", "producer start");

    if !provider.init() || !provider.start(test_mode) {
        error!(target: "producer", "acquisition backend failed to initialize; exiting producer");
        ring.close();
        return;
    }

    // publish channel metadata before the first chunk
    let mut n_ch = provider.num_channels();
    if n_ch == 0 || n_ch > NUM_CH_CHUNK {
        n_ch = NUM_CH_CHUNK; // clamp
    }
    store.set_n_eeg_channels(n_ch);

    let mut labels = provider.channel_labels();
    for i in labels.len()..n_ch {
        labels.push(format!("Ch{}", i + 1));
    }
    labels.truncate(NUM_CH_CHUNK);
    let mut enabled = [false; NUM_CH_CHUNK];
    for slot in enabled.iter_mut().take(n_ch) {
        *slot = true;
    }
    store.set_channel_config(ChannelConfig { labels, enabled });

    let mut tick: u64 = 0;
    let mut consecutive_failures: u32 = 0;

    while !store.stopped() {
        // the synthetic backend produces the sinusoid for whichever
        // frequency the stimulus controller is currently flashing
        provider.set_active_stimulus_hz(f64::from(store.stim_freq_hz()));

        let mut chunk = Chunk::default();
        if !provider.get_data(NUM_SCANS_CHUNK, &mut chunk.data) {
            consecutive_failures += 1;
            warn!(
                target: "producer",
                "get_data failed ({consecutive_failures}/{MAX_CONSECUTIVE_READ_FAILURES})"
            );
            if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                error!(target: "producer", "device read failed repeatedly; stopping acquisition");
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
            continue;
        }
        consecutive_failures = 0;

        tick += 1;
        chunk.tick = tick;
        chunk.epoch_ms = epoch_ms_now();

        if let Some(f) = filter.as_mut() {
            f.process(&mut chunk);
        }

        store.set_last_chunk(&chunk);

        if ring.push(chunk).is_err() {
            info!(target: "producer", "ring closed while pushing; stopping producer");
            break;
        }
    }

    info!(target: "producer", "producer shutting down; stopping acquisition backend");
    provider.stop_and_close();
    ring.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ACQ_RING_CAPACITY;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Provider that yields a fixed number of chunks then fails forever.
    struct FiniteProvider {
        chunks_left: usize,
    }

    impl AcqProvider for FiniteProvider {
        fn init(&mut self) -> bool {
            true
        }
        fn start(&mut self, _test_mode: bool) -> bool {
            true
        }
        fn stop_and_close(&mut self) -> bool {
            true
        }
        fn get_data(&mut self, num_scans: usize, dest: &mut [f32]) -> bool {
            if self.chunks_left == 0 {
                return false;
            }
            self.chunks_left -= 1;
            for (i, v) in dest.iter_mut().take(num_scans * NUM_CH_CHUNK).enumerate() {
                *v = i as f32;
            }
            true
        }
        fn num_channels(&self) -> usize {
            NUM_CH_CHUNK
        }
        fn channel_labels(&self) -> Vec<String> {
            vec!["Fz".into(), "Cz".into()]
        }
    }

    struct CountingFilter(Arc<AtomicUsize>);

    impl ChunkFilter for CountingFilter {
        fn process(&mut self, _chunk: &mut Chunk) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn producer_stops_after_repeated_read_failures_and_closes_ring() {
        let ring = Arc::new(ChunkRing::with_capacity(ACQ_RING_CAPACITY));
        let store = Arc::new(StateStore::new());
        let filtered = Arc::new(AtomicUsize::new(0));

        let handle = {
            let ring = Arc::clone(&ring);
            let store = Arc::clone(&store);
            let filter = CountingFilter(Arc::clone(&filtered));
            std::thread::spawn(move || {
                producer_thread(
                    &ring,
                    &store,
                    Box::new(FiniteProvider { chunks_left: 5 }),
                    Some(Box::new(filter)),
                    true,
                );
            })
        };

        let mut got = 0;
        while ring.pop().is_ok() {
            got += 1;
        }
        handle.join().unwrap();
        assert_eq!(got, 5);
        assert_eq!(filtered.load(Ordering::Relaxed), 5);
        assert!(ring.is_closed());
        assert!(store.has_eeg_chunk());

        // ticks are monotonic from 1; last published chunk is the 5th
        assert_eq!(store.last_chunk().tick, 5);
        // fallback labels were synthesized past the two provided
        let cfg = store.channel_config();
        assert_eq!(cfg.labels.len(), NUM_CH_CHUNK);
        assert_eq!(cfg.labels[0], "Fz");
        assert_eq!(cfg.labels[2], "Ch3");
        assert!(cfg.enabled.iter().all(|&e| e));
    }

    struct BrokenProvider;

    impl AcqProvider for BrokenProvider {
        fn init(&mut self) -> bool {
            false
        }
        fn start(&mut self, _test_mode: bool) -> bool {
            false
        }
        fn stop_and_close(&mut self) -> bool {
            true
        }
        fn get_data(&mut self, _num_scans: usize, _dest: &mut [f32]) -> bool {
            false
        }
        fn num_channels(&self) -> usize {
            0
        }
        fn channel_labels(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn init_failure_closes_ring_immediately() {
        let ring = Arc::new(ChunkRing::with_capacity(4));
        let store = StateStore::new();
        producer_thread(&ring, &store, Box::new(BrokenProvider), None, false);
        assert!(ring.is_closed());
        assert!(!store.has_eeg_chunk());
    }
}
