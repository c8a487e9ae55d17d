//! Training coordinator.
//!
//! Parks on the train-job condition variable until the consumer finishes a
//! finalize, then snapshots the session, spawns the external trainer and
//! blocks on it. Success flips the model-ready slots and appends a saved
//! session; failure posts `TrainingFailed` back to the UI state machine.
//! The trainer is a black box: its `train_result.json` is never parsed
//! here.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};

use crate::session;
use crate::state_store::{ActiveSession, SavedSession, StateStore};
use crate::types::{TestFreq, UiEvent};

#[derive(Clone, Debug)]
pub struct TrainerConfig {
    pub python: String,
    pub script: PathBuf,
}

impl TrainerConfig {
    /// Defaults to `<project_root>/train/train_svm.py`, overridable through
    /// `SSVEP_PYTHON` / `SSVEP_TRAIN_SCRIPT`.
    pub fn from_env() -> Self {
        let python = std::env::var("SSVEP_PYTHON").unwrap_or_else(|_| {
            if cfg!(target_os = "windows") {
                "python".to_owned()
            } else {
                "python3".to_owned()
            }
        });
        let script = std::env::var("SSVEP_TRAIN_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                session::find_project_root()
                    .join("train")
                    .join("train_svm.py")
            });
        Self { python, script }
    }
}

/// "Nov 25, 14:20 (alice)" for the sessions page; falls back to the raw
/// session id when it doesn't parse as a timestamp.
fn session_label(subject: &str, session_id: &str) -> String {
    match NaiveDateTime::parse_from_str(session_id, "%Y-%m-%d_%H-%M-%S") {
        Ok(dt) => format!("{} ({})", dt.format("%b %d, %H:%M"), subject),
        Err(_) => format!("{session_id} ({subject})"),
    }
}

fn build_saved_session(active: &ActiveSession) -> SavedSession {
    SavedSession {
        id: format!("{}_{}", active.subject_id, active.session_id),
        label: session_label(&active.subject_id, &active.session_id),
        subject: active.subject_id.clone(),
        session: active.session_id.clone(),
        created_at: Local::now().to_rfc3339(),
        model_dir: active.model_dir.clone(),
        // the trainer's chosen pair lives in train_result.json, which the
        // UI layer reads; the core records the entry with defaults
        freq_left_hz: 0,
        freq_right_hz: 0,
        freq_left_hz_e: TestFreq::None,
        freq_right_hz_e: TestFreq::None,
    }
}

fn run_training_job(cfg: &TrainerConfig, active: &ActiveSession, store: &StateStore) -> Result<()> {
    if active.subject_id.is_empty()
        || active.session_id.is_empty()
        || active.data_dir.is_empty()
        || active.model_dir.is_empty()
    {
        bail!("training requested with incomplete session fields");
    }

    std::fs::create_dir_all(&active.model_dir)
        .with_context(|| format!("create model dir {}", active.model_dir))?;

    let arch = store.train_arch();
    let calib_setting = store.calib_data_setting();

    info!(
        target: "trainer",
        "launching trainer: subject={} session={} arch={}",
        active.subject_id,
        active.session_id,
        arch.as_str()
    );

    // blocks this thread for the duration of the job
    let status = Command::new(&cfg.python)
        .arg(&cfg.script)
        .args(["--data", &active.data_dir])
        .args(["--model", &active.model_dir])
        .args(["--subject", &active.subject_id])
        .args(["--session", &active.session_id])
        .args(["--arch", arch.as_str()])
        .args(["--calibsetting", calib_setting.as_str()])
        .status()
        .with_context(|| format!("spawn {} {:?}", cfg.python, cfg.script))?;

    if !status.success() {
        bail!("trainer exited with {status}");
    }
    Ok(())
}

/// Coordinator loop: one training job per consumed event.
pub fn trainer_thread(store: &StateStore, cfg: TrainerConfig) {
    info!(target: "trainer", "coordinator start");
    loop {
        if !store.train_job_request.wait(store.stop_flag()) {
            info!(target: "trainer", "coordinator exit");
            return;
        }

        let active = store.session_info.snapshot();
        store
            .session_info
            .model_ready
            .store(false, std::sync::atomic::Ordering::Release);

        match run_training_job(&cfg, &active, store) {
            Ok(()) => {
                info!(target: "trainer", "training succeeded for {}", active.session_id);
                store.set_model_just_ready();
                store
                    .session_info
                    .model_ready
                    .store(true, std::sync::atomic::Ordering::Release);
                let idx = store.push_saved_session(build_saved_session(&active));
                store
                    .current_session_idx
                    .store(idx, std::sync::atomic::Ordering::Release);
            }
            Err(e) => {
                error!(target: "trainer", "training failed: {e:#}");
                store.post_ui_event(UiEvent::TrainingFailed);
                warn!(target: "trainer", "model not ready for {}", active.session_id);
            }
        }
    }
}
