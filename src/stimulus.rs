//! UI / stimulus state machine.
//!
//! Single controller thread polling at 2 ms. External events arrive from
//! the HTTP transport through the atomic event slot; timer expiries,
//! connection detection and model-ready signals are raised internally.
//! Transitions run through a flat `(from, event) -> to` table after a set
//! of interception guards (calibration form validation, popup latching,
//! must-calibrate-first). Every accepted transition publishes a new UI
//! sequence number.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::session::{self, SessionPaths};
use crate::state_store::{ActiveSession, StateStore};
use crate::timer::BlockTimer;
use crate::types::{EpilepsyRisk, TestFreq, UiEvent, UiPopup, UiState};

const POLL_INTERVAL: Duration = Duration::from_millis(2);
const ACTIVE_BLOCK: Duration = Duration::from_secs(15);
const INSTRUCTIONS_BLOCK: Duration = Duration::from_secs(10);
const MIN_SUBJECT_NAME_LEN: usize = 3;

const DEFAULT_FREQS: [TestFreq; 5] = [
    TestFreq::F8,
    TestFreq::F9,
    TestFreq::F10,
    TestFreq::F11,
    TestFreq::F12,
];
const HIGH_FREQS: [TestFreq; 4] = [TestFreq::F20, TestFreq::F25, TestFreq::F30, TestFreq::F35];

// (from, event) -> to. UserPushesExit returns Home from everywhere.
const TRANSITIONS: &[(UiState, UiEvent, UiState)] = &[
    (UiState::None, UiEvent::ConnectionSuccessful, UiState::Home),
    (UiState::Home, UiEvent::UserPushesStartCalib, UiState::CalibOptions),
    (
        UiState::CalibOptions,
        UiEvent::UserPushesStartCalibFromOptions,
        UiState::Instructions,
    ),
    (
        UiState::Instructions,
        UiEvent::StimControllerTimeout,
        UiState::ActiveCalib,
    ),
    (
        UiState::ActiveCalib,
        UiEvent::StimControllerTimeout,
        UiState::Instructions,
    ),
    (
        UiState::ActiveCalib,
        UiEvent::StimControllerTimeoutEndCalib,
        UiState::PendingTraining,
    ),
    (UiState::PendingTraining, UiEvent::ModelReady, UiState::Home),
    (UiState::PendingTraining, UiEvent::TrainingFailed, UiState::Home),
    (UiState::Home, UiEvent::UserPushesStartRun, UiState::RunOptions),
    (
        UiState::RunOptions,
        UiEvent::UserPushesStartDefault,
        UiState::ActiveRun,
    ),
    (
        UiState::RunOptions,
        UiEvent::UserPushesSessions,
        UiState::SavedSessions,
    ),
    (
        UiState::SavedSessions,
        UiEvent::UserSelectsSession,
        UiState::ActiveRun,
    ),
    (
        UiState::SavedSessions,
        UiEvent::UserSelectsNewSession,
        UiState::CalibOptions,
    ),
    (
        UiState::Home,
        UiEvent::UserPushesHardwareChecks,
        UiState::HardwareChecks,
    ),
    (UiState::Home, UiEvent::UserPushesSettings, UiState::Settings),
    (UiState::CalibOptions, UiEvent::UserPushesExit, UiState::Home),
    (UiState::Instructions, UiEvent::UserPushesExit, UiState::Home),
    (UiState::ActiveCalib, UiEvent::UserPushesExit, UiState::Home),
    (UiState::PendingTraining, UiEvent::UserPushesExit, UiState::Home),
    (UiState::RunOptions, UiEvent::UserPushesExit, UiState::Home),
    (UiState::SavedSessions, UiEvent::UserPushesExit, UiState::Home),
    (UiState::ActiveRun, UiEvent::UserPushesExit, UiState::Home),
    (UiState::HardwareChecks, UiEvent::UserPushesExit, UiState::Home),
    (UiState::Settings, UiEvent::UserPushesExit, UiState::Home),
];

fn lookup_transition(from: UiState, event: UiEvent) -> Option<UiState> {
    TRANSITIONS
        .iter()
        .find(|(f, e, _)| *f == from && *e == event)
        .map(|(_, _, to)| *to)
}

pub struct StimulusController<'a> {
    store: &'a StateStore,
    project_root: PathBuf,
    timer: BlockTimer,

    // protocol scheduling
    freq_queue: Vec<TestFreq>,
    active_queue_idx: usize,
    num_active_blocks: usize,
    end_calib_emitted: bool,
    session_created: bool,
    active_block_dur: Duration,
    instructions_block_dur: Duration,

    // calibration form staging
    pending_subject: String,
    pending_epilepsy: EpilepsyRisk,
    awaiting_overwrite: bool,
    awaiting_highfreq: bool,
    overwrite_confirmed: bool,
    highfreq_confirmed: bool,
}

impl<'a> StimulusController<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self::with_project_root(store, session::find_project_root())
    }

    pub fn with_project_root(store: &'a StateStore, project_root: PathBuf) -> Self {
        Self {
            store,
            project_root,
            timer: BlockTimer::new(),
            freq_queue: DEFAULT_FREQS.to_vec(),
            active_queue_idx: 0,
            num_active_blocks: DEFAULT_FREQS.len(),
            end_calib_emitted: false,
            session_created: false,
            active_block_dur: ACTIVE_BLOCK,
            instructions_block_dur: INSTRUCTIONS_BLOCK,
            pending_subject: String::new(),
            pending_epilepsy: EpilepsyRisk::Unknown,
            awaiting_overwrite: false,
            awaiting_highfreq: false,
            overwrite_confirmed: false,
            highfreq_confirmed: false,
        }
    }

    /// Overrides the protocol block lengths (15 s active / 10 s rest by
    /// default). Short blocks keep self-tests fast.
    pub fn with_block_durations(mut self, active: Duration, instructions: Duration) -> Self {
        self.active_block_dur = active;
        self.instructions_block_dur = instructions;
        self
    }

    /// Main loop: poll, process, sleep 2 ms.
    pub fn run(&mut self) {
        info!(target: "stim", "state machine start");
        while !self.store.stopped() {
            let ev = self.poll_event();
            if ev != UiEvent::None {
                self.process_event(ev);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        info!(target: "stim", "state machine exit");
    }

    /// Event sources in priority order: external slot, end-of-calibration
    /// timeout, plain timeout, connection detection, model-ready.
    fn poll_event(&mut self) -> UiEvent {
        let external = self.store.take_ui_event();
        if external != UiEvent::None {
            return external;
        }

        let state = self.store.ui_state();

        if self.timer.is_started() && self.timer.expired() {
            if state == UiState::ActiveCalib
                && self.active_queue_idx >= self.num_active_blocks
                && !self.end_calib_emitted
            {
                // rising edge, once per calibration
                self.end_calib_emitted = true;
                return UiEvent::StimControllerTimeoutEndCalib;
            }
            return UiEvent::StimControllerTimeout;
        }

        if state == UiState::None && self.store.refresh_hz() > 0 {
            return UiEvent::ConnectionSuccessful;
        }

        if state == UiState::PendingTraining && self.store.take_model_just_ready() {
            return UiEvent::ModelReady;
        }

        UiEvent::None
    }

    fn process_event(&mut self, ev: UiEvent) {
        let from = self.store.ui_state();

        // popup arbitration: ack may remap back to the original event
        let ev = match ev {
            UiEvent::UserAcksPopup => {
                self.store.clear_popup();
                if self.awaiting_overwrite {
                    self.awaiting_overwrite = false;
                    self.overwrite_confirmed = true;
                    UiEvent::UserPushesStartCalibFromOptions
                } else if self.awaiting_highfreq {
                    self.awaiting_highfreq = false;
                    self.highfreq_confirmed = true;
                    UiEvent::UserPushesStartCalibFromOptions
                } else {
                    return;
                }
            }
            UiEvent::UserCancelsPopup => {
                self.store.clear_popup();
                self.awaiting_overwrite = false;
                self.awaiting_highfreq = false;
                self.overwrite_confirmed = false;
                self.highfreq_confirmed = false;
                return;
            }
            other => other,
        };

        // run mode needs at least one trained session beyond the default
        if ev == UiEvent::UserPushesStartRun
            && from == UiState::Home
            && self.store.saved_sessions_len() <= 1
        {
            self.store.raise_popup(UiPopup::MustCalibBeforeRun);
            return;
        }

        if ev == UiEvent::UserPushesStartCalibFromOptions
            && from == UiState::CalibOptions
            && !self.validate_calib_options()
        {
            return;
        }

        let Some(to) = lookup_transition(from, ev) else {
            debug!(target: "stim", "no transition for {from:?} + {ev:?}");
            return;
        };

        self.on_exit(from, ev);
        self.store.set_ui_state(to);
        self.store.bump_ui_seq();
        self.on_enter(from, to, ev);
        info!(target: "stim", "{from:?} + {ev:?} -> {to:?}");
    }

    /// Calibration form gate. Returns true when the calibration may start;
    /// otherwise a popup is raised and the event is swallowed.
    fn validate_calib_options(&mut self) -> bool {
        let form = self.store.calib_form();
        let name = form.subject_name.trim().to_owned();

        if form.epilepsy == EpilepsyRisk::Unknown || name.len() < MIN_SUBJECT_NAME_LEN {
            self.store.raise_popup(UiPopup::InvalidCalibOptions);
            return false;
        }

        let subject = session::sanitize_subject_id(&name);
        if !self.overwrite_confirmed && self.store.subject_has_saved_session(&subject) {
            self.store.raise_popup(UiPopup::ConfirmOverwriteCalib);
            self.awaiting_overwrite = true;
            return false;
        }

        if !self.highfreq_confirmed && form.epilepsy == EpilepsyRisk::HighFreqOk {
            self.store.raise_popup(UiPopup::ConfirmHighFreqOk);
            self.awaiting_highfreq = true;
            return false;
        }

        self.pending_subject = name;
        self.pending_epilepsy = form.epilepsy;
        self.store.clear_calib_form();
        self.overwrite_confirmed = false;
        self.highfreq_confirmed = false;
        true
    }

    /// The stimulator can only flicker cleanly at integer divisors of the
    /// monitor refresh rate. Drop queue entries until one divides, but only
    /// when the refresh offers any usable divisor in [6, 20]; otherwise
    /// accept the candidate as-is.
    fn advance_to_admissible_freq(&mut self, refresh_hz: u32) {
        if refresh_hz == 0 {
            return;
        }
        let has_usable_divisor = (6..=20).any(|d| refresh_hz % d == 0);
        if !has_usable_divisor {
            return;
        }
        while self.active_queue_idx < self.freq_queue.len() {
            let hz = self.freq_queue[self.active_queue_idx].hz();
            if hz > 0 && refresh_hz % hz == 0 {
                return;
            }
            info!(
                target: "stim",
                "dropping {hz} Hz: not a divisor of {refresh_hz} Hz refresh"
            );
            self.active_queue_idx += 1;
        }
    }

    fn on_exit(&mut self, from: UiState, ev: UiEvent) {
        match from {
            UiState::ActiveCalib | UiState::Instructions => {
                self.timer.stop();
                if ev == UiEvent::StimControllerTimeoutEndCalib {
                    // hand the session to the consumer for finalize + training
                    self.store.finalize_request.set();
                }
                if ev == UiEvent::UserPushesExit {
                    self.abandon_calibration();
                }
            }
            UiState::ActiveRun | UiState::HardwareChecks => {
                self.timer.stop();
            }
            _ => {}
        }
    }

    fn on_enter(&mut self, _prev: UiState, to: UiState, ev: UiEvent) {
        match to {
            UiState::Home => {
                self.store.reset_block_id();
                self.store.set_stim_freq(TestFreq::None);
                self.store.reset_signal_stats();
                self.store.set_is_calib(false);
                self.end_calib_emitted = false;
                self.session_created = false;
                if ev == UiEvent::TrainingFailed {
                    self.store.raise_popup(UiPopup::TrainJobFailed);
                }
            }
            UiState::Instructions => {
                if !self.session_created {
                    self.begin_calibration_session();
                }
                self.advance_to_admissible_freq(self.store.refresh_hz());
                self.timer.start(self.instructions_block_dur);
            }
            UiState::ActiveCalib => {
                self.store.bump_block_id();
                let freq = self
                    .freq_queue
                    .get(self.active_queue_idx)
                    .copied()
                    .unwrap_or(TestFreq::None);
                self.store.set_stim_freq(freq);
                if self.active_queue_idx < self.freq_queue.len() {
                    self.active_queue_idx += 1;
                }
                self.timer.start(self.active_block_dur);
            }
            UiState::PendingTraining => {
                self.store.set_stim_freq(TestFreq::None);
            }
            _ => {}
        }
    }

    /// First `Instructions` block of a calibration: create the on-disk
    /// session, publish its paths, pick the protocol frequency set.
    fn begin_calibration_session(&mut self) {
        match session::create_session_at(&self.project_root, &self.pending_subject) {
            Ok(sp) => {
                info!(
                    target: "stim",
                    "calibration session {} for {}", sp.session_id, sp.subject_id
                );
                self.store.session_info.set(ActiveSession {
                    subject_id: sp.subject_id,
                    session_id: sp.session_id,
                    data_dir: sp.data_session_dir.to_string_lossy().into_owned(),
                    model_dir: sp.model_session_dir.to_string_lossy().into_owned(),
                    epilepsy_risk: self.pending_epilepsy,
                });
                self.store
                    .session_info
                    .model_ready
                    .store(false, std::sync::atomic::Ordering::Release);
                self.store.set_is_calib(true);
            }
            Err(e) => {
                error!(target: "stim", "create_session failed: {e:#}");
            }
        }

        self.freq_queue = if self.pending_epilepsy == EpilepsyRisk::HighFreqOk {
            HIGH_FREQS.to_vec()
        } else {
            DEFAULT_FREQS.to_vec()
        };
        self.active_queue_idx = 0;
        self.num_active_blocks = self.freq_queue.len();
        self.end_calib_emitted = false;
        self.session_created = true;
    }

    /// User walked out of a running calibration: the half-written session
    /// is deleted and the active fields cleared.
    fn abandon_calibration(&mut self) {
        let active = self.store.session_info.snapshot();
        if !active.session_id.is_empty() {
            warn!(
                target: "stim",
                "calibration abandoned; deleting {}", active.session_id
            );
            let sp = SessionPaths {
                project_root: self.project_root.clone(),
                subject_id: active.subject_id,
                session_id: active.session_id,
                data_session_dir: PathBuf::from(&active.data_dir),
                model_session_dir: PathBuf::from(&active.model_dir),
            };
            session::delete_session_dirs_if_in_progress(&sp);
        }
        self.store.session_info.clear();
        self.store.set_is_calib(false);
        self.session_created = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn controller_in<'a>(store: &'a StateStore, root: &TempDir) -> StimulusController<'a> {
        let mut c = StimulusController::with_project_root(store, root.path().to_path_buf());
        // millisecond blocks so timer-driven tests run instantly
        c.active_block_dur = Duration::from_millis(5);
        c.instructions_block_dur = Duration::from_millis(5);
        c
    }

    fn fill_valid_form(store: &StateStore) {
        store.set_calib_form("alice".to_owned(), EpilepsyRisk::LowFreqOnly);
    }

    fn drive_to_calib_options<'a>(
        store: &'a StateStore,
        root: &TempDir,
    ) -> StimulusController<'a> {
        let mut c = controller_in(store, root);
        store.set_refresh_hz(60);
        let ev = c.poll_event();
        assert_eq!(ev, UiEvent::ConnectionSuccessful);
        c.process_event(ev);
        assert_eq!(store.ui_state(), UiState::Home);
        c.process_event(UiEvent::UserPushesStartCalib);
        assert_eq!(store.ui_state(), UiState::CalibOptions);
        c
    }

    #[test]
    fn connection_moves_none_to_home_and_bumps_seq() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = controller_in(&store, &root);
        // no refresh yet: nothing happens
        assert_eq!(c.poll_event(), UiEvent::None);
        store.set_refresh_hz(60);
        let seq_before = store.ui_seq();
        let ev = c.poll_event();
        c.process_event(ev);
        assert_eq!(store.ui_state(), UiState::Home);
        assert!(store.ui_seq() > seq_before);
    }

    #[test]
    fn invalid_calib_options_raise_popup_and_swallow() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);

        // missing epilepsy disclosure
        store.set_calib_form("alice".to_owned(), EpilepsyRisk::Unknown);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        assert_eq!(store.ui_state(), UiState::CalibOptions);
        assert_eq!(store.popup(), UiPopup::InvalidCalibOptions);

        // name too short
        store.set_calib_form("ab".to_owned(), EpilepsyRisk::LowFreqOnly);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        assert_eq!(store.ui_state(), UiState::CalibOptions);
        assert_eq!(store.popup(), UiPopup::InvalidCalibOptions);
    }

    #[test]
    fn valid_calib_options_create_session_and_enter_instructions() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);
        fill_valid_form(&store);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        assert_eq!(store.ui_state(), UiState::Instructions);
        assert!(store.is_calib());

        let active = store.session_info.snapshot();
        assert_eq!(active.subject_id, "alice");
        assert!(session::is_in_progress_session_id(&active.session_id));
        assert!(PathBuf::from(&active.data_dir).is_dir());
        // form is consumed on success
        assert!(store.calib_form().subject_name.is_empty());
    }

    #[test]
    fn overwrite_popup_acks_back_into_calibration() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);

        let mut existing = crate::state_store::SavedSession::default_entry();
        existing.id = "alice_x".into();
        existing.subject = "alice".into();
        store.push_saved_session(existing);

        fill_valid_form(&store);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        assert_eq!(store.ui_state(), UiState::CalibOptions);
        assert_eq!(store.popup(), UiPopup::ConfirmOverwriteCalib);

        // ack remaps to the original event and proceeds
        fill_valid_form(&store);
        c.process_event(UiEvent::UserAcksPopup);
        assert_eq!(store.ui_state(), UiState::Instructions);
        assert_eq!(store.popup(), UiPopup::None);
    }

    #[test]
    fn overwrite_popup_cancel_stays_put() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);

        let mut existing = crate::state_store::SavedSession::default_entry();
        existing.id = "alice_x".into();
        existing.subject = "alice".into();
        store.push_saved_session(existing);

        fill_valid_form(&store);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        assert_eq!(store.popup(), UiPopup::ConfirmOverwriteCalib);
        c.process_event(UiEvent::UserCancelsPopup);
        assert_eq!(store.ui_state(), UiState::CalibOptions);
        assert_eq!(store.popup(), UiPopup::None);
        assert!(!c.awaiting_overwrite);
    }

    #[test]
    fn high_freq_risk_requires_confirmation_and_swaps_queue() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);

        store.set_calib_form("bob".to_owned(), EpilepsyRisk::HighFreqOk);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        assert_eq!(store.popup(), UiPopup::ConfirmHighFreqOk);
        assert_eq!(store.ui_state(), UiState::CalibOptions);

        store.set_calib_form("bob".to_owned(), EpilepsyRisk::HighFreqOk);
        c.process_event(UiEvent::UserAcksPopup);
        assert_eq!(store.ui_state(), UiState::Instructions);
        assert_eq!(c.freq_queue, HIGH_FREQS.to_vec());
    }

    #[test]
    fn must_calibrate_before_run() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = controller_in(&store, &root);
        store.set_refresh_hz(60);
        let ev = c.poll_event();
        c.process_event(ev);

        c.process_event(UiEvent::UserPushesStartRun);
        assert_eq!(store.ui_state(), UiState::Home);
        assert_eq!(store.popup(), UiPopup::MustCalibBeforeRun);

        // once a real session exists, run options open
        store.clear_popup();
        let mut trained = crate::state_store::SavedSession::default_entry();
        trained.id = "carol_x".into();
        trained.subject = "carol".into();
        store.push_saved_session(trained);
        c.process_event(UiEvent::UserPushesStartRun);
        assert_eq!(store.ui_state(), UiState::RunOptions);
        c.process_event(UiEvent::UserPushesStartDefault);
        assert_eq!(store.ui_state(), UiState::ActiveRun);
    }

    #[test]
    fn refresh_admissibility_drops_non_divisors() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = controller_in(&store, &root);
        // 60 Hz refresh: 8 and 9 don't divide, 10 does
        c.advance_to_admissible_freq(60);
        assert_eq!(c.freq_queue[c.active_queue_idx], TestFreq::F10);
        assert_eq!(c.active_queue_idx, 2);

        // a refresh with no divisor in [6, 20] accepts anything
        let mut c2 = controller_in(&store, &root);
        c2.advance_to_admissible_freq(23);
        assert_eq!(c2.active_queue_idx, 0);
    }

    #[test]
    fn full_calibration_emits_end_calib_and_requests_finalize() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);
        fill_valid_form(&store);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        assert_eq!(store.ui_state(), UiState::Instructions);

        // walk every instructions/active pair to the end of the queue
        let mut end_seen = false;
        for _ in 0..40 {
            std::thread::sleep(Duration::from_millis(7));
            let ev = c.poll_event();
            if ev == UiEvent::None {
                continue;
            }
            if ev == UiEvent::StimControllerTimeoutEndCalib {
                end_seen = true;
                c.process_event(ev);
                break;
            }
            c.process_event(ev);
        }
        assert!(end_seen, "end-of-calibration timeout never fired");
        assert_eq!(store.ui_state(), UiState::PendingTraining);
        assert!(store.finalize_request.take());
        // the frequency the consumer reads is cleared for pending training
        assert_eq!(store.stim_freq(), TestFreq::None);

        // model becomes ready -> back home exactly once
        store.set_model_just_ready();
        let ev = c.poll_event();
        assert_eq!(ev, UiEvent::ModelReady);
        c.process_event(ev);
        assert_eq!(store.ui_state(), UiState::Home);
        assert_eq!(store.block_id(), 0);
    }

    #[test]
    fn training_failed_returns_home_with_popup() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = controller_in(&store, &root);
        store.set_ui_state(UiState::PendingTraining);
        c.process_event(UiEvent::TrainingFailed);
        assert_eq!(store.ui_state(), UiState::Home);
        assert_eq!(store.popup(), UiPopup::TrainJobFailed);
    }

    #[test]
    fn exit_mid_calibration_deletes_in_progress_session() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);
        fill_valid_form(&store);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);
        let active = store.session_info.snapshot();
        let data_dir = PathBuf::from(&active.data_dir);
        assert!(data_dir.is_dir());

        c.process_event(UiEvent::UserPushesExit);
        assert_eq!(store.ui_state(), UiState::Home);
        assert!(!data_dir.exists());
        assert!(store.session_info.snapshot().session_id.is_empty());
        assert!(!store.is_calib());
    }

    #[test]
    fn active_calib_entry_publishes_block_and_frequency() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = drive_to_calib_options(&store, &root);
        fill_valid_form(&store);
        c.process_event(UiEvent::UserPushesStartCalibFromOptions);

        std::thread::sleep(Duration::from_millis(7));
        let ev = c.poll_event();
        assert_eq!(ev, UiEvent::StimControllerTimeout);
        c.process_event(ev);
        assert_eq!(store.ui_state(), UiState::ActiveCalib);
        assert_eq!(store.block_id(), 1);
        // refresh 60 dropped 8 and 9; the first admissible default is 10 Hz
        assert_eq!(store.stim_freq(), TestFreq::F10);
        assert_eq!(store.stim_freq_hz(), 10);
    }

    #[test]
    fn unknown_pairs_are_ignored() {
        let store = StateStore::new();
        let root = TempDir::new().unwrap();
        let mut c = controller_in(&store, &root);
        store.set_ui_state(UiState::Home);
        let seq = store.ui_seq();
        c.process_event(UiEvent::StimControllerTimeout);
        assert_eq!(store.ui_state(), UiState::Home);
        assert_eq!(store.ui_seq(), seq);
    }
}
