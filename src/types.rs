// src/types.rs
use serde::{Serialize, Serializer};

// CHUNKING POLICY
// Unicorn EEG has 8 channels (EEG1..EEG8) sampled at 250 Hz; 32 scans per
// chunk is ~128 ms of latency per getData() call.
pub const NUM_CH_CHUNK: usize = 8;
pub const NUM_SCANS_CHUNK: usize = 32;
pub const NUM_SAMPLES_CHUNK: usize = NUM_CH_CHUNK * NUM_SCANS_CHUNK;
pub const SAMPLE_RATE_HZ: f64 = 250.0;

// WINDOW GEOMETRY
// 320 scans @ 250 Hz is a 1.28 s analysis window; hop of 40 scans slides it
// every 0.16 s (~87% overlap).
pub const WINDOW_SCANS: usize = NUM_SCANS_CHUNK * 10;
pub const WINDOW_HOP_SCANS: usize = 40;
pub const WINDOW_SAMPLES: usize = WINDOW_SCANS * NUM_CH_CHUNK;
pub const WINDOW_HOP_SAMPLES: usize = WINDOW_HOP_SCANS * NUM_CH_CHUNK;

// Scans trimmed from each end of a calibration window before it is logged,
// so block-transition transients never land in the training set.
pub const WINDOW_TRIM_SCANS: usize = 40;

pub const ACQ_RING_CAPACITY: usize = 32;

/// A short, fixed-size batch of scans from the EEG device.
///
/// One scan is one sample from every enabled channel at the same instant.
/// Samples are time-major interleaved: `idx = scan * NUM_CH_CHUNK + ch`,
/// in microvolts. Created by the acquisition thread, immutable once pushed
/// into the ring.
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Monotonic sequence number (0,1,2,..) assigned by the producer so the
    /// consumer can detect dropped chunks.
    pub tick: u64,
    /// Timestamp of the first scan in the chunk, ms since the Unix epoch.
    pub epoch_ms: f64,
    pub num_ch: usize,
    pub num_scans: usize,
    pub data: [f32; NUM_SAMPLES_CHUNK],
}

impl Default for Chunk {
    fn default() -> Self {
        Self {
            tick: 0,
            epoch_ms: 0.0,
            num_ch: NUM_CH_CHUNK,
            num_scans: NUM_SCANS_CHUNK,
            data: [0.0; NUM_SAMPLES_CHUNK],
        }
    }
}

/// Which "screen" the browser UI should be showing. Wire values are fixed;
/// the JS client switches views on the integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UiState {
    ActiveRun = 0,
    ActiveCalib = 1,
    Instructions = 2,
    Home = 3,
    SavedSessions = 4,
    RunOptions = 5,
    HardwareChecks = 6,
    CalibOptions = 7,
    PendingTraining = 8,
    Settings = 9,
    None = 10,
}

impl UiState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::ActiveRun,
            1 => Self::ActiveCalib,
            2 => Self::Instructions,
            3 => Self::Home,
            4 => Self::SavedSessions,
            5 => Self::RunOptions,
            6 => Self::HardwareChecks,
            7 => Self::CalibOptions,
            8 => Self::PendingTraining,
            9 => Self::Settings,
            _ => Self::None,
        }
    }
}

/// Events that drive the UI state machine. External ones arrive from the
/// HTTP transport through the atomic event slot; internal ones are raised
/// by the stimulus controller itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UiEvent {
    None = 0,
    ConnectionSuccessful = 1,
    StimControllerTimeout = 2,
    StimControllerTimeoutEndCalib = 3,
    UserPushesStartCalib = 4,
    UserPushesStartCalibFromOptions = 5,
    UserPushesStartRun = 6,
    UserPushesStartDefault = 7,
    UserPushesSessions = 8,
    UserSelectsSession = 9,
    UserSelectsNewSession = 10,
    UserPushesExit = 11,
    UserAcksPopup = 12,
    UserCancelsPopup = 13,
    UserPushesHardwareChecks = 14,
    UserPushesSettings = 15,
    ModelReady = 16,
    TrainingFailed = 17,
}

impl UiEvent {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::ConnectionSuccessful,
            2 => Self::StimControllerTimeout,
            3 => Self::StimControllerTimeoutEndCalib,
            4 => Self::UserPushesStartCalib,
            5 => Self::UserPushesStartCalibFromOptions,
            6 => Self::UserPushesStartRun,
            7 => Self::UserPushesStartDefault,
            8 => Self::UserPushesSessions,
            9 => Self::UserSelectsSession,
            10 => Self::UserSelectsNewSession,
            11 => Self::UserPushesExit,
            12 => Self::UserAcksPopup,
            13 => Self::UserCancelsPopup,
            14 => Self::UserPushesHardwareChecks,
            15 => Self::UserPushesSettings,
            16 => Self::ModelReady,
            17 => Self::TrainingFailed,
            _ => Self::None,
        }
    }
}

/// Modal popups carried in an atomic slot. A popup never drives a state
/// transition by itself; the user's ack/cancel does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UiPopup {
    None = 0,
    MustCalibBeforeRun = 1,
    ModelFailedToLoad = 2,
    TooManyBadWindowsInRun = 3,
    InvalidCalibOptions = 4,
    ConfirmOverwriteCalib = 5,
    ConfirmHighFreqOk = 6,
    TrainJobFailed = 7,
}

impl UiPopup {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::MustCalibBeforeRun,
            2 => Self::ModelFailedToLoad,
            3 => Self::TooManyBadWindowsInRun,
            4 => Self::InvalidCalibOptions,
            5 => Self::ConfirmOverwriteCalib,
            6 => Self::ConfirmHighFreqOk,
            7 => Self::TrainJobFailed,
            _ => Self::None,
        }
    }
}

/// Stimulus test frequency labels attached to calibration windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TestFreq {
    None = 0,
    F8 = 1,
    F9 = 2,
    F10 = 3,
    F11 = 4,
    F12 = 5,
    F20 = 6,
    F25 = 7,
    F30 = 8,
    F35 = 9,
}

impl TestFreq {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::F8,
            2 => Self::F9,
            3 => Self::F10,
            4 => Self::F11,
            5 => Self::F12,
            6 => Self::F20,
            7 => Self::F25,
            8 => Self::F30,
            9 => Self::F35,
            _ => Self::None,
        }
    }

    /// Flicker rate in Hz; 0 for `None`.
    pub fn hz(self) -> u32 {
        match self {
            Self::None => 0,
            Self::F8 => 8,
            Self::F9 => 9,
            Self::F10 => 10,
            Self::F11 => 11,
            Self::F12 => 12,
            Self::F20 => 20,
            Self::F25 => 25,
            Self::F30 => 30,
            Self::F35 => 35,
        }
    }
}

// Wire-visible as its integer value.
impl Serialize for TestFreq {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// Epilepsy risk disclosure from the calibration options form. Gates which
/// stimulus frequency set the protocol may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum EpilepsyRisk {
    #[default]
    Unknown = 0,
    LowFreqOnly = 1,
    HighFreqOk = 2,
}

impl EpilepsyRisk {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::LowFreqOnly,
            2 => Self::HighFreqOk,
            _ => Self::Unknown,
        }
    }
}

/// Classifier output attached to run-mode windows. The inference pipeline
/// itself lives outside this crate; windows discarded mid-build are marked
/// `Unknown`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SsvepDecision {
    Left,
    Right,
    #[default]
    None,
    Unknown,
}

/// Model architecture handed to the external trainer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TrainArch {
    #[default]
    Svm = 0,
    Cnn = 1,
}

impl TrainArch {
    pub fn from_u8(v: u8) -> Self {
        if v == 1 {
            Self::Cnn
        } else {
            Self::Svm
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Svm => "svm",
            Self::Cnn => "cnn",
        }
    }
}

/// Which calibration data the trainer should consume. Free-form as far as
/// this crate is concerned; only the trainer interprets it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CalibDataSetting {
    #[default]
    MostRecentOnly = 0,
    AllSessions = 1,
}

impl CalibDataSetting {
    pub fn from_u8(v: u8) -> Self {
        if v == 1 {
            Self::AllSessions
        } else {
            Self::MostRecentOnly
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MostRecentOnly => "most_recent_only",
            Self::AllSessions => "all_sessions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_state_round_trips_wire_values() {
        for v in 0..=10u8 {
            assert_eq!(UiState::from_u8(v) as u8, v);
        }
        assert_eq!(UiState::from_u8(200), UiState::None);
    }

    #[test]
    fn test_freq_hz_mapping() {
        assert_eq!(TestFreq::None.hz(), 0);
        assert_eq!(TestFreq::F8.hz(), 8);
        assert_eq!(TestFreq::F35.hz(), 35);
        for v in 0..=9u8 {
            assert_eq!(TestFreq::from_u8(v) as u8, v);
        }
    }

    #[test]
    fn window_geometry_is_channel_aligned() {
        assert_eq!(WINDOW_SAMPLES % NUM_CH_CHUNK, 0);
        assert!(WINDOW_HOP_SAMPLES <= WINDOW_SAMPLES);
    }
}
