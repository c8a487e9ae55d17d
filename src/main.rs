// src/main.rs
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info};

use ssvep_runtime::acq::{self, AcqProvider, SynthConfig, SyntheticAcquisition, UnicornDriver};
use ssvep_runtime::consumer;
use ssvep_runtime::stimulus::StimulusController;
use ssvep_runtime::trainer::{self, TrainerConfig};
use ssvep_runtime::types::{Chunk, ACQ_RING_CAPACITY};
use ssvep_runtime::{ChunkRing, StateStore};

const TEST_MODE: bool = true;

fn select_provider() -> Box<dyn AcqProvider + Send> {
    match std::env::var("ACQ_BACKEND").as_deref() {
        Ok("unicorn") => {
            info!("PATH=HARDWARE");
            Box::new(UnicornDriver::new())
        }
        _ => {
            info!("PATH=MOCK");
            let mut cfg = SynthConfig::default();
            cfg.dc_drift.enabled = true;
            cfg.line_noise.enabled = true;
            cfg.alpha.enabled = true;
            cfg.beta.enabled = true;
            cfg.paced = true;
            // random artifact source stays off for now
            Box::new(SyntheticAcquisition::new(cfg))
        }
    }
}

fn main() {
    env_logger::init();
    info!("start");

    let store = Arc::new(StateStore::new());
    let ring: Arc<ChunkRing<Chunk>> = Arc::new(ChunkRing::with_capacity(ACQ_RING_CAPACITY));

    // Ctrl+C flips the stop flag; every loop polls it
    {
        let store = Arc::clone(&store);
        let ring = Arc::clone(&ring);
        if let Err(e) = ctrlc::set_handler(move || {
            store.shutdown();
            ring.close();
        }) {
            error!("failed to install SIGINT handler: {e}");
        }
    }

    let producer = {
        let ring = Arc::clone(&ring);
        let store = Arc::clone(&store);
        let provider = select_provider();
        thread::spawn(move || acq::producer_thread(&ring, &store, provider, None, TEST_MODE))
    };

    let windower = {
        let ring = Arc::clone(&ring);
        let store = Arc::clone(&store);
        thread::spawn(move || consumer::consumer_thread(&ring, &store))
    };

    let stim = {
        let store = Arc::clone(&store);
        thread::spawn(move || StimulusController::new(&store).run())
    };

    let train = {
        let store = Arc::clone(&store);
        thread::spawn(move || trainer::trainer_thread(&store, TrainerConfig::from_env()))
    };

    // keep the sleep tiny so Ctrl+C feels instant
    while !store.stopped() {
        thread::sleep(Duration::from_millis(30));
    }

    ring.close();
    store.shutdown();
    for (name, handle) in [
        ("producer", producer),
        ("consumer", windower),
        ("stim", stim),
        ("trainer", train),
    ] {
        if handle.join().is_err() {
            error!("{name} thread panicked");
        }
    }
    info!("exit");
}
