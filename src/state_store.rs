//! Single source of truth shared by every runtime thread and, through the
//! JSON wire snapshot, the browser UI.
//!
//! Plain snapshots live in atomics; anything structured sits behind a
//! per-field mutex. Cross-thread handshakes (finalize, train job) use
//! condition-variable event slots so signals are never lost to spurious
//! wakeups. There is deliberately no cross-field transaction: readers that
//! need consistency across fields (the windowing consumer) snapshot twice
//! and discard on mismatch.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::types::{
    CalibDataSetting, Chunk, EpilepsyRisk, TestFreq, TrainArch, UiEvent, UiPopup, UiState,
    NUM_CH_CHUNK,
};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot event slot: `(mutex, condvar, bool)`.
///
/// Producers flip the flag under the mutex then notify; consumers either
/// poll with [`take`](EventSlot::take) or block in [`wait`](EventSlot::wait)
/// until the flag or a stop request shows up. Taking the event clears the
/// flag while the mutex is held.
#[derive(Default)]
pub struct EventSlot {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl EventSlot {
    pub fn set(&self) {
        *lock(&self.flag) = true;
        self.cv.notify_all();
    }

    /// Non-blocking consume. True if the event was pending.
    pub fn take(&self) -> bool {
        let mut flag = lock(&self.flag);
        let was_set = *flag;
        *flag = false;
        was_set
    }

    /// Blocks until the event fires or `stop` goes high. Returns false on
    /// stop. The timed re-check keeps a missed notify from wedging shutdown.
    pub fn wait(&self, stop: &AtomicBool) -> bool {
        let mut flag = lock(&self.flag);
        loop {
            if *flag {
                *flag = false;
                return true;
            }
            if stop.load(Ordering::Acquire) {
                return false;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(flag, Duration::from_millis(100))
                .unwrap_or_else(PoisonError::into_inner);
            flag = guard;
        }
    }

    pub fn wake_all(&self) {
        self.cv.notify_all();
    }
}

/// Per-channel rolling averages published for the UI signal page.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChannelAverages {
    pub mean_uv: [f32; NUM_CH_CHUNK],
    pub std_uv: [f32; NUM_CH_CHUNK],
    pub rms_uv: [f32; NUM_CH_CHUNK],
    pub kurt: [f32; NUM_CH_CHUNK],
    pub entropy: [f32; NUM_CH_CHUNK],
    pub max_abs_uv: [f32; NUM_CH_CHUNK],
    pub max_step_uv: [f32; NUM_CH_CHUNK],
}

/// Rolling 45 s signal-quality summary, written by the quality analyzer on
/// cadence and read by the wire snapshot.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SignalStats {
    pub num_win_in_rolling: usize,
    pub rolling: ChannelAverages,
    pub current_bad_win_rate: f32,
    pub overall_bad_win_rate: f32,
}

/// One completed calibration, appended after its training job succeeds.
/// Never mutated in place.
#[derive(Clone, Debug, Serialize)]
pub struct SavedSession {
    pub id: String,
    pub label: String,
    pub subject: String,
    pub session: String,
    pub created_at: String,
    pub model_dir: String,
    pub freq_left_hz: u32,
    pub freq_right_hz: u32,
    pub freq_left_hz_e: TestFreq,
    pub freq_right_hz_e: TestFreq,
}

impl SavedSession {
    /// The built-in entry run mode falls back to when no calibration exists.
    pub fn default_entry() -> Self {
        Self {
            id: "default".to_owned(),
            label: "Default".to_owned(),
            subject: String::new(),
            session: String::new(),
            created_at: String::new(),
            model_dir: String::new(),
            freq_left_hz: 0,
            freq_right_hz: 0,
            freq_left_hz_e: TestFreq::None,
            freq_right_hz_e: TestFreq::None,
        }
    }
}

/// Paths and ids of the session currently being acquired or trained.
#[derive(Clone, Debug, Default)]
pub struct ActiveSession {
    pub subject_id: String,
    pub session_id: String,
    pub data_dir: String,
    pub model_dir: String,
    pub epilepsy_risk: EpilepsyRisk,
}

pub struct SessionInfo {
    pub model_ready: AtomicBool,
    inner: Mutex<ActiveSession>,
}

impl SessionInfo {
    pub fn snapshot(&self) -> ActiveSession {
        lock(&self.inner).clone()
    }

    pub fn set(&self, fields: ActiveSession) {
        *lock(&self.inner) = fields;
    }

    pub fn clear(&self) {
        *lock(&self.inner) = ActiveSession::default();
        self.model_ready.store(false, Ordering::Release);
    }

    pub fn update<F: FnOnce(&mut ActiveSession)>(&self, f: F) {
        f(&mut lock(&self.inner));
    }
}

/// Pending subject name / epilepsy disclosure from the calibration options
/// form, staged by the HTTP transport until the user confirms.
#[derive(Clone, Debug, Default)]
pub struct CalibForm {
    pub subject_name: String,
    pub epilepsy: EpilepsyRisk,
}

/// Channel metadata published by the producer before streaming starts.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub labels: Vec<String>,
    pub enabled: [bool; NUM_CH_CHUNK],
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            labels: (1..=NUM_CH_CHUNK).map(|i| format!("Ch{i}")).collect(),
            enabled: [true; NUM_CH_CHUNK],
        }
    }
}

pub struct StateStore {
    // single-field snapshots
    ui_state: AtomicU8,
    ui_event: AtomicU8,
    ui_popup: AtomicU8,
    ui_seq: AtomicU32,
    block_id: AtomicU32,
    freq_hz_e: AtomicU8,
    freq_hz: AtomicU32,
    refresh_hz: AtomicU32,
    n_eeg_channels: AtomicUsize,
    has_eeg_chunk: AtomicBool,
    is_calib: AtomicBool,
    train_arch: AtomicU8,
    calib_data: AtomicU8,
    stop: AtomicBool,

    // structured records
    channel_config: Mutex<ChannelConfig>,
    last_chunk: Mutex<Chunk>,
    signal_stats: Mutex<SignalStats>,
    calib_form: Mutex<CalibForm>,
    saved_sessions: Mutex<Vec<SavedSession>>,
    pub current_session_idx: AtomicUsize,
    pub session_info: SessionInfo,

    // cross-thread handshakes
    pub finalize_request: EventSlot,
    pub train_job_request: EventSlot,
    model_just_ready: Mutex<bool>,

    // bookkeeping
    pub windows_emitted: AtomicU64,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            ui_state: AtomicU8::new(UiState::None as u8),
            ui_event: AtomicU8::new(UiEvent::None as u8),
            ui_popup: AtomicU8::new(UiPopup::None as u8),
            ui_seq: AtomicU32::new(0),
            block_id: AtomicU32::new(0),
            freq_hz_e: AtomicU8::new(TestFreq::None as u8),
            freq_hz: AtomicU32::new(0),
            refresh_hz: AtomicU32::new(0),
            n_eeg_channels: AtomicUsize::new(NUM_CH_CHUNK),
            has_eeg_chunk: AtomicBool::new(false),
            is_calib: AtomicBool::new(false),
            train_arch: AtomicU8::new(TrainArch::default() as u8),
            calib_data: AtomicU8::new(CalibDataSetting::default() as u8),
            stop: AtomicBool::new(false),
            channel_config: Mutex::new(ChannelConfig::default()),
            last_chunk: Mutex::new(Chunk::default()),
            signal_stats: Mutex::new(SignalStats::default()),
            calib_form: Mutex::new(CalibForm::default()),
            saved_sessions: Mutex::new(vec![SavedSession::default_entry()]),
            current_session_idx: AtomicUsize::new(0),
            session_info: SessionInfo {
                model_ready: AtomicBool::new(false),
                inner: Mutex::new(ActiveSession::default()),
            },
            finalize_request: EventSlot::default(),
            train_job_request: EventSlot::default(),
            model_just_ready: Mutex::new(false),
            windows_emitted: AtomicU64::new(0),
        }
    }

    // ---- UI state / sequencing (stimulus controller is the only writer) ----

    pub fn ui_state(&self) -> UiState {
        UiState::from_u8(self.ui_state.load(Ordering::Acquire))
    }

    pub fn set_ui_state(&self, state: UiState) {
        self.ui_state.store(state as u8, Ordering::Release);
    }

    pub fn ui_seq(&self) -> u32 {
        self.ui_seq.load(Ordering::Acquire)
    }

    pub fn bump_ui_seq(&self) {
        self.ui_seq.fetch_add(1, Ordering::AcqRel);
    }

    // ---- UI event slot (HTTP posts, stimulus controller consumes) ----

    pub fn post_ui_event(&self, ev: UiEvent) {
        // only the stimulus controller may write None back
        if ev != UiEvent::None {
            self.ui_event.store(ev as u8, Ordering::Release);
        }
    }

    pub fn take_ui_event(&self) -> UiEvent {
        UiEvent::from_u8(self.ui_event.swap(UiEvent::None as u8, Ordering::AcqRel))
    }

    // ---- popups ----

    pub fn popup(&self) -> UiPopup {
        UiPopup::from_u8(self.ui_popup.load(Ordering::Acquire))
    }

    pub fn raise_popup(&self, popup: UiPopup) {
        self.ui_popup.store(popup as u8, Ordering::Release);
    }

    pub fn clear_popup(&self) {
        self.ui_popup.store(UiPopup::None as u8, Ordering::Release);
    }

    // ---- protocol block / stimulus frequency ----

    pub fn block_id(&self) -> u32 {
        self.block_id.load(Ordering::Acquire)
    }

    pub fn bump_block_id(&self) {
        self.block_id.fetch_add(1, Ordering::AcqRel);
    }

    pub fn reset_block_id(&self) {
        self.block_id.store(0, Ordering::Release);
    }

    pub fn stim_freq(&self) -> TestFreq {
        TestFreq::from_u8(self.freq_hz_e.load(Ordering::Acquire))
    }

    pub fn stim_freq_hz(&self) -> u32 {
        self.freq_hz.load(Ordering::Acquire)
    }

    pub fn set_stim_freq(&self, freq: TestFreq) {
        self.freq_hz_e.store(freq as u8, Ordering::Release);
        self.freq_hz.store(freq.hz(), Ordering::Release);
    }

    pub fn refresh_hz(&self) -> u32 {
        self.refresh_hz.load(Ordering::Acquire)
    }

    /// Written once by the transport when the browser reports its monitor
    /// refresh rate; a nonzero value doubles as "UI connected".
    pub fn set_refresh_hz(&self, hz: u32) {
        if hz > 0 {
            self.refresh_hz.store(hz, Ordering::Release);
        }
    }

    pub fn is_calib(&self) -> bool {
        self.is_calib.load(Ordering::Acquire)
    }

    pub fn set_is_calib(&self, v: bool) {
        self.is_calib.store(v, Ordering::Release);
    }

    // ---- channel metadata ----

    pub fn n_eeg_channels(&self) -> usize {
        self.n_eeg_channels.load(Ordering::Acquire)
    }

    pub fn set_n_eeg_channels(&self, n: usize) {
        self.n_eeg_channels.store(n, Ordering::Release);
    }

    pub fn channel_config(&self) -> ChannelConfig {
        lock(&self.channel_config).clone()
    }

    pub fn set_channel_config(&self, cfg: ChannelConfig) {
        *lock(&self.channel_config) = cfg;
    }

    // ---- last chunk (producer writes, UI reads) ----

    pub fn has_eeg_chunk(&self) -> bool {
        self.has_eeg_chunk.load(Ordering::Acquire)
    }

    pub fn set_last_chunk(&self, chunk: &Chunk) {
        *lock(&self.last_chunk) = chunk.clone();
        self.has_eeg_chunk.store(true, Ordering::Release);
    }

    pub fn last_chunk(&self) -> Chunk {
        lock(&self.last_chunk).clone()
    }

    // ---- rolling signal stats (quality analyzer writes) ----

    pub fn signal_stats(&self) -> SignalStats {
        lock(&self.signal_stats).clone()
    }

    pub fn set_signal_stats(&self, stats: SignalStats) {
        *lock(&self.signal_stats) = stats;
    }

    pub fn reset_signal_stats(&self) {
        *lock(&self.signal_stats) = SignalStats::default();
    }

    // ---- calibration options form ----

    pub fn set_calib_form(&self, subject_name: String, epilepsy: EpilepsyRisk) {
        let mut form = lock(&self.calib_form);
        form.subject_name = subject_name;
        form.epilepsy = epilepsy;
    }

    pub fn calib_form(&self) -> CalibForm {
        lock(&self.calib_form).clone()
    }

    pub fn clear_calib_form(&self) {
        *lock(&self.calib_form) = CalibForm::default();
    }

    // ---- saved sessions ----

    pub fn snapshot_saved_sessions(&self) -> Vec<SavedSession> {
        lock(&self.saved_sessions).clone()
    }

    pub fn saved_sessions_len(&self) -> usize {
        lock(&self.saved_sessions).len()
    }

    /// Appends and returns the new entry's index.
    pub fn push_saved_session(&self, session: SavedSession) -> usize {
        let mut sessions = lock(&self.saved_sessions);
        sessions.push(session);
        sessions.len() - 1
    }

    pub fn subject_has_saved_session(&self, subject: &str) -> bool {
        lock(&self.saved_sessions)
            .iter()
            .any(|s| !s.subject.is_empty() && s.subject == subject)
    }

    // ---- settings ----

    pub fn train_arch(&self) -> TrainArch {
        TrainArch::from_u8(self.train_arch.load(Ordering::Acquire))
    }

    pub fn set_train_arch(&self, arch: TrainArch) {
        self.train_arch.store(arch as u8, Ordering::Release);
    }

    pub fn calib_data_setting(&self) -> CalibDataSetting {
        CalibDataSetting::from_u8(self.calib_data.load(Ordering::Acquire))
    }

    pub fn set_calib_data_setting(&self, setting: CalibDataSetting) {
        self.calib_data.store(setting as u8, Ordering::Release);
    }

    // ---- model-just-ready slot (trainer sets, stim controller polls) ----

    pub fn set_model_just_ready(&self) {
        *lock(&self.model_just_ready) = true;
    }

    pub fn take_model_just_ready(&self) -> bool {
        let mut flag = lock(&self.model_just_ready);
        let was_set = *flag;
        *flag = false;
        was_set
    }

    // ---- shutdown ----

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// Sets the stop flag and wakes every condition-variable waiter.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.finalize_request.wake_all();
        self.train_job_request.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn event_slot_take_consumes_once() {
        let slot = EventSlot::default();
        assert!(!slot.take());
        slot.set();
        assert!(slot.take());
        assert!(!slot.take());
    }

    #[test]
    fn event_slot_wait_sees_set_from_other_thread() {
        let slot = Arc::new(EventSlot::default());
        let stop = Arc::new(AtomicBool::new(false));
        let waiter = {
            let slot = Arc::clone(&slot);
            let stop = Arc::clone(&stop);
            thread::spawn(move || slot.wait(&stop))
        };
        thread::sleep(Duration::from_millis(20));
        slot.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn event_slot_wait_returns_false_on_stop() {
        let slot = Arc::new(EventSlot::default());
        let stop = Arc::new(AtomicBool::new(false));
        let waiter = {
            let slot = Arc::clone(&slot);
            let stop = Arc::clone(&stop);
            thread::spawn(move || slot.wait(&stop))
        };
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Release);
        slot.wake_all();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn ui_event_slot_exchanges_to_none() {
        let store = StateStore::new();
        store.post_ui_event(UiEvent::UserPushesStartCalib);
        assert_eq!(store.take_ui_event(), UiEvent::UserPushesStartCalib);
        assert_eq!(store.take_ui_event(), UiEvent::None);
    }

    #[test]
    fn ui_seq_is_monotonic() {
        let store = StateStore::new();
        let mut last = store.ui_seq();
        for _ in 0..10 {
            store.bump_ui_seq();
            let now = store.ui_seq();
            assert!(now > last);
            last = now;
        }
    }

    #[test]
    fn saved_sessions_start_with_default_entry() {
        let store = StateStore::new();
        let sessions = store.snapshot_saved_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "default");
        assert!(!store.subject_has_saved_session(""));
    }

    #[test]
    fn set_stim_freq_keeps_enum_and_hz_in_step() {
        let store = StateStore::new();
        store.set_stim_freq(TestFreq::F12);
        assert_eq!(store.stim_freq(), TestFreq::F12);
        assert_eq!(store.stim_freq_hz(), 12);
    }
}
