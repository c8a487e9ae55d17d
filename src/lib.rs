//! Real-time SSVEP brain-computer interface runtime.
//!
//! An 8-channel EEG headset streams 250 Hz samples through a bounded SPSC
//! ring into a windowing consumer, which maintains overlapping analysis
//! windows, grades signal quality, and logs labelled calibration data. A
//! stimulus controller sequences the calibration protocol and a training
//! coordinator drives the out-of-process model trainer. Everything meets
//! in a single shared [`state_store::StateStore`], which the browser UI
//! polls over the (out-of-process) HTTP transport via [`wire`].

pub mod acq;
pub mod consumer;
pub mod quality;
pub mod ring;
pub mod session;
pub mod state_store;
pub mod stimulus;
pub mod timer;
pub mod trainer;
pub mod types;
pub mod window;
pub mod wire;

pub use ring::{ChunkRing, RingError};
pub use state_store::StateStore;
pub use types::Chunk;
