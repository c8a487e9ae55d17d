//! JSON wire format between the runtime and the browser UI.
//!
//! The HTTP transport itself runs out of process; it polls
//! [`StateSnapshot`] as the `/state` body and forwards `/event` POST
//! bodies through [`parse_event_action`]. Enum fields travel as their
//! integer wire values.

use serde::Serialize;
use serde_json::Value;

use crate::state_store::{SavedSession, StateStore};
use crate::types::UiEvent;

#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub seq: u32,
    pub stim_window: u8,
    pub block_id: u32,
    pub freq_hz: u32,
    pub freq_hz_e: u8,
    pub refresh_hz: u32,
    pub popup: u8,
    pub is_calib: bool,
    pub is_model_ready: bool,
    pub active_subject_id: String,
    pub active_session_id: String,
    pub has_eeg: bool,
    pub n_eeg_channels: usize,
    pub channel_labels: Vec<String>,
    pub current_session_idx: usize,
    pub saved_sessions: Vec<SavedSession>,
    pub current_bad_win_rate: f32,
    pub overall_bad_win_rate: f32,
}

/// Snapshot read of everything the UI polls for.
pub fn snapshot(store: &StateStore) -> StateSnapshot {
    let active = store.session_info.snapshot();
    let stats = store.signal_stats();
    StateSnapshot {
        seq: store.ui_seq(),
        stim_window: store.ui_state() as u8,
        block_id: store.block_id(),
        freq_hz: store.stim_freq_hz(),
        freq_hz_e: store.stim_freq() as u8,
        refresh_hz: store.refresh_hz(),
        popup: store.popup() as u8,
        is_calib: store.is_calib(),
        is_model_ready: store
            .session_info
            .model_ready
            .load(std::sync::atomic::Ordering::Acquire),
        active_subject_id: active.subject_id,
        active_session_id: active.session_id,
        has_eeg: store.has_eeg_chunk(),
        n_eeg_channels: store.n_eeg_channels(),
        channel_labels: store.channel_config().labels,
        current_session_idx: store
            .current_session_idx
            .load(std::sync::atomic::Ordering::Acquire),
        saved_sessions: store.snapshot_saved_sessions(),
        current_bad_win_rate: stats.current_bad_win_rate,
        overall_bad_win_rate: stats.overall_bad_win_rate,
    }
}

pub fn snapshot_json(store: &StateStore) -> String {
    serde_json::to_string(&snapshot(store)).unwrap_or_else(|e| {
        log::error!(target: "wire", "state snapshot serialization failed: {e}");
        "{}".to_owned()
    })
}

/// Maps a POSTed `{"action": "..."}` body to a UI event. Unknown actions
/// and malformed bodies come back as `None` and are dropped by the caller.
pub fn parse_event_action(body: &str) -> UiEvent {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return UiEvent::None;
    };
    let Some(action) = value.get("action").and_then(Value::as_str) else {
        return UiEvent::None;
    };
    match action {
        "start_calib" => UiEvent::UserPushesStartCalib,
        "start_calib_from_options" => UiEvent::UserPushesStartCalibFromOptions,
        "start_run" => UiEvent::UserPushesStartRun,
        "start_default" => UiEvent::UserPushesStartDefault,
        "show_sessions" => UiEvent::UserPushesSessions,
        "select_session" => UiEvent::UserSelectsSession,
        "new_session" => UiEvent::UserSelectsNewSession,
        "exit" => UiEvent::UserPushesExit,
        "ack_popup" => UiEvent::UserAcksPopup,
        "cancel_popup" => UiEvent::UserCancelsPopup,
        "hardware_checks" => UiEvent::UserPushesHardwareChecks,
        "settings" => UiEvent::UserPushesSettings,
        _ => UiEvent::None,
    }
}
