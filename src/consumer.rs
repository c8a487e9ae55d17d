//! Windowing consumer thread.
//!
//! Pops chunks from the SPSC ring, maintains the overlapping sliding
//! window, snapshots UI state before and after each refill so windows that
//! span a state transition are discarded, runs every surviving window
//! through the quality analyzer, logs labelled calibration windows to the
//! per-session CSV and services finalize requests from the stimulus
//! controller.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use log::{error, info, warn};

use crate::quality::SignalQualityAnalyzer;
use crate::ring::ChunkRing;
use crate::session::{self, SessionPaths, SESSIONS_KEPT_PER_SUBJECT};
use crate::state_store::StateStore;
use crate::timer::BlockTimer;
use crate::types::{
    Chunk, SsvepDecision, TestFreq, UiState, NUM_CH_CHUNK, WINDOW_TRIM_SCANS,
};
use crate::window::SlidingWindow;

const WINDOW_CSV_NAME: &str = "eeg_windows.csv";
const CSV_FLUSH_EVERY_ROWS: u64 = 5000;

// run-mode watchdog: popup when bad/clean >= 1:4 over a 9 s span
const RUN_BAD_WINDOW_SPAN: Duration = Duration::from_secs(9);
const RUN_BAD_WINDOW_RATIO: f32 = 0.25;

/// Per-session window CSV. One row per scan per logged window. The writer
/// rebinds itself (close + reopen) whenever the active session changes.
pub struct WindowCsvWriter {
    writer: Option<BufWriter<File>>,
    bound_key: String,
    rows_written: u64,
}

impl Default for WindowCsvWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowCsvWriter {
    pub fn new() -> Self {
        Self {
            writer: None,
            bound_key: String::new(),
            rows_written: 0,
        }
    }

    fn ensure_bound(&mut self, data_dir: &str, session_id: &str, n_ch: usize) -> bool {
        let key = format!("{data_dir}|{session_id}");
        if self.writer.is_some() && self.bound_key == key {
            return true;
        }
        self.close();

        let dir = if data_dir.is_empty() {
            // hardware checks can run without a session; log beside the binary
            PathBuf::from(".")
        } else {
            PathBuf::from(data_dir)
        };
        let path = dir.join(WINDOW_CSV_NAME);
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                error!(target: "consumer", "failed to open {:?}: {e}", path);
                return false;
            }
        };
        let mut w = BufWriter::new(file);
        let mut header = String::from("window_idx,ui_state,is_trimmed,is_bad,sample_idx");
        for ch in 0..n_ch {
            header.push_str(&format!(",eeg{}", ch + 1));
        }
        header.push_str(",testfreq_e,testfreq_hz");
        if writeln!(w, "{header}").is_err() {
            return false;
        }
        info!(target: "consumer", "opened {:?}", path);
        self.writer = Some(w);
        self.bound_key = key;
        self.rows_written = 0;
        true
    }

    /// Writes one window, trimmed when requested and available.
    pub fn log_window(
        &mut self,
        window: &SlidingWindow,
        snapshot: &[f32],
        ui_state: UiState,
        n_ch: usize,
        use_trimmed: bool,
        data_dir: &str,
        session_id: &str,
    ) {
        if !self.ensure_bound(data_dir, session_id, n_ch) {
            return;
        }
        let buf: &[f32] = if use_trimmed && window.is_trimmed && !window.trimmed.is_empty() {
            &window.trimmed
        } else {
            snapshot
        };
        if buf.is_empty() {
            warn!(target: "consumer", "snapshot empty, skipping CSV");
            return;
        }
        if buf.len() % n_ch != 0 {
            warn!(target: "consumer", "snapshot size not divisible by n_ch; skipping CSV");
            return;
        }
        let n_scans = buf.len() / n_ch;

        let tf_e = window.test_freq as u8;
        let tf_hz: i32 = if window.test_freq == TestFreq::None {
            -1
        } else {
            window.test_freq.hz() as i32
        };
        let trimmed_flag = u8::from(use_trimmed && window.is_trimmed);
        let bad_flag = u8::from(window.is_artifactual);

        let mut write_failed = false;
        if let Some(w) = self.writer.as_mut() {
            for s in 0..n_scans {
                let mut row = format!(
                    "{},{},{},{},{}",
                    window.tick, ui_state as u8, trimmed_flag, bad_flag, s
                );
                for ch in 0..n_ch {
                    row.push_str(&format!(",{}", buf[s * n_ch + ch]));
                }
                row.push_str(&format!(",{tf_e},{tf_hz}"));
                if writeln!(w, "{row}").is_err() {
                    write_failed = true;
                    break;
                }
                self.rows_written += 1;
            }
            if !write_failed && self.rows_written % CSV_FLUSH_EVERY_ROWS < n_scans as u64 {
                let _ = w.flush();
            }
        }
        if write_failed {
            warn!(target: "consumer", "CSV write failed; dropping writer");
            self.writer = None;
        }
    }

    pub fn close(&mut self) {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }
        self.bound_key.clear();
    }
}

fn clamped_channel_count(store: &StateStore) -> usize {
    let n = store.n_eeg_channels();
    if n == 0 || n > NUM_CH_CHUNK {
        NUM_CH_CHUNK
    } else {
        n
    }
}

/// Finalize handshake: flush + close the window CSV, rename the session
/// directories from in-progress to final, publish the final paths, prune
/// older sessions for the subject, then request the training job.
fn handle_finalize(store: &StateStore, csv: &mut WindowCsvWriter) {
    info!(target: "consumer", "finalize requested");
    csv.close();

    let active = store.session_info.snapshot();
    if active.session_id.is_empty() {
        warn!(target: "consumer", "finalize with no active session; ignoring");
        return;
    }

    let mut sp = SessionPaths {
        project_root: PathBuf::new(),
        subject_id: active.subject_id.clone(),
        session_id: active.session_id.clone(),
        data_session_dir: PathBuf::from(&active.data_dir),
        model_session_dir: PathBuf::from(&active.model_dir),
    };
    session::finalize_session_dirs(&mut sp);

    store.session_info.update(|s| {
        s.session_id = sp.session_id.clone();
        s.data_dir = sp.data_session_dir.to_string_lossy().into_owned();
        s.model_dir = sp.model_session_dir.to_string_lossy().into_owned();
    });

    for dir in [&sp.data_session_dir, &sp.model_session_dir] {
        if let Some(subject_dir) = dir.parent() {
            session::prune_old_sessions_for_subject(subject_dir, SESSIONS_KEPT_PER_SUBJECT);
        }
    }

    store.train_job_request.set();
    info!(target: "consumer", "session {} finalized; training requested", sp.session_id);
}

/// One refill pass. Returns `Ok(true)` when the window filled cleanly,
/// `Ok(false)` when the UI changed mid-refill (window must be discarded)
/// and `Err(())` when the ring closed.
fn refill_window(
    ring: &ChunkRing<Chunk>,
    store: &StateStore,
    window: &mut SlidingWindow,
    prev_state: UiState,
    prev_label: TestFreq,
) -> Result<bool, ()> {
    while !window.is_full() {
        if store.ui_state() != prev_state || store.stim_freq() != prev_label {
            return Ok(false);
        }
        if window.stash_len() > 0 {
            window.take_from_stash();
            continue;
        }
        let chunk = ring.pop().map_err(|_| ())?;
        if let Err(e) = window.accept_chunk(&chunk) {
            // invariant violation: log and drop this window, keep the thread
            error!(target: "consumer", "sliding window stash: {e}");
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn consumer_thread(ring: &ChunkRing<Chunk>, store: &StateStore) {
    info!(target: "consumer", "consumer start");

    let mut analyzer = SignalQualityAnalyzer::new();
    let mut window = SlidingWindow::default_geometry();
    let mut csv = WindowCsvWriter::new();
    let mut snapshot: Vec<f32> = Vec::with_capacity(window.win_len());
    let mut window_count: u64 = 0;

    let mut run_bad_count: u32 = 0;
    let mut run_clean_count: u32 = 0;
    let mut run_bad_timer = BlockTimer::new();

    // build the first full window before entering the steady-state loop
    while !window.is_full() {
        if window.stash_len() > 0 {
            window.take_from_stash();
            continue;
        }
        match ring.pop() {
            Ok(chunk) => {
                if let Err(e) = window.accept_chunk(&chunk) {
                    error!(target: "consumer", "initial fill: {e}");
                }
            }
            Err(_) => {
                info!(target: "consumer", "ring closed during initial fill; consumer exit");
                return;
            }
        }
    }

    while !store.stopped() {
        // finalize request from the stimulus controller, checked every pass
        if store.finalize_request.take() {
            handle_finalize(store, &mut csv);
        }

        // (1) snapshot UI state before building; idle states just drain the
        // ring so the producer never blocks
        let prev_state = store.ui_state();
        let prev_label = store.stim_freq();
        if matches!(
            prev_state,
            UiState::Home | UiState::Instructions | UiState::None
        ) {
            if ring.pop().is_err() {
                break;
            }
            continue;
        }

        // (2) slide and refill
        window.slide();
        let filled = match refill_window(ring, store, &mut window, prev_state, prev_label) {
            Ok(f) => f,
            Err(()) => break, // ring closed mid-refill
        };

        // (3) re-validate: a state change between the two snapshots voids
        // the window as training data
        if !filled || store.ui_state() != prev_state || store.stim_freq() != prev_label {
            window.decision = SsvepDecision::Unknown;
            window.has_label = false;
            continue;
        }

        window_count += 1;
        window.tick = window_count;
        window.reset_labels();
        window.decision = SsvepDecision::None;
        store
            .windows_emitted
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let n_ch = clamped_channel_count(store);
        window.snapshot_into(&mut snapshot);

        // every emitted window goes through the quality gates, whatever
        // mode it was captured in, so the rolling baseline stays continuous
        analyzer.assess_window(&mut window, store);

        match prev_state {
            UiState::ActiveCalib => {
                // drop the transition transients at both ends before logging
                window.trim_snapshot(WINDOW_TRIM_SCANS * n_ch, WINDOW_TRIM_SCANS * n_ch);
                window.test_freq = prev_label;
                window.has_label = prev_label != TestFreq::None;
                if window.has_label {
                    let active = store.session_info.snapshot();
                    csv.log_window(
                        &window,
                        &snapshot,
                        prev_state,
                        n_ch,
                        true,
                        &active.data_dir,
                        &active.session_id,
                    );
                }
            }
            UiState::HardwareChecks => {
                // every hardware-check window is logged, untrimmed, unlabelled
                let active = store.session_info.snapshot();
                csv.log_window(
                    &window,
                    &snapshot,
                    prev_state,
                    n_ch,
                    false,
                    &active.data_dir,
                    &active.session_id,
                );
            }
            UiState::ActiveRun => {
                if run_bad_timer.expired() {
                    let ratio = run_bad_count as f32 / run_clean_count.max(1) as f32;
                    if ratio >= RUN_BAD_WINDOW_RATIO {
                        warn!(
                            target: "consumer",
                            "run mode: {run_bad_count} bad / {run_clean_count} clean windows in 9 s"
                        );
                        store.raise_popup(crate::types::UiPopup::TooManyBadWindowsInRun);
                    }
                    run_bad_count = 0;
                    run_clean_count = 0;
                    run_bad_timer.stop();
                }

                if window.is_artifactual {
                    if !run_bad_timer.is_started() {
                        run_bad_timer.start(RUN_BAD_WINDOW_SPAN);
                    }
                    run_bad_count += 1;
                    continue; // don't hand this window to the classifier
                } else if run_bad_timer.is_started() {
                    run_clean_count += 1;
                }
                // classifier pipeline picks up the clean window from here
            }
            _ => {}
        }
    }

    csv.close();
    ring.close();
    info!(target: "consumer", "consumer exit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NUM_SAMPLES_CHUNK, NUM_SCANS_CHUNK, WINDOW_SCANS};
    use std::fs;
    use tempfile::TempDir;

    fn filled_window() -> (SlidingWindow, Vec<f32>) {
        let mut w = SlidingWindow::default_geometry();
        let mut tick = 0u64;
        while !w.is_full() {
            if w.stash_len() > 0 {
                w.take_from_stash();
                continue;
            }
            let mut c = Chunk {
                tick,
                ..Chunk::default()
            };
            for (i, v) in c.data.iter_mut().enumerate() {
                *v = (i % NUM_SAMPLES_CHUNK) as f32 * 0.1;
            }
            tick += 1;
            w.accept_chunk(&c).unwrap();
        }
        let mut snap = Vec::new();
        w.snapshot_into(&mut snap);
        (w, snap)
    }

    #[test]
    fn csv_writer_emits_one_row_per_scan() {
        let tmp = TempDir::new().unwrap();
        let (mut w, snap) = filled_window();
        w.tick = 7;
        w.test_freq = TestFreq::F10;
        w.has_label = true;

        let mut csv = WindowCsvWriter::new();
        csv.log_window(
            &w,
            &snap,
            UiState::ActiveCalib,
            NUM_CH_CHUNK,
            false,
            tmp.path().to_str().unwrap(),
            "sess-a",
        );
        csv.close();

        let text = fs::read_to_string(tmp.path().join(WINDOW_CSV_NAME)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + WINDOW_SCANS);
        assert_eq!(
            lines[0],
            "window_idx,ui_state,is_trimmed,is_bad,sample_idx,eeg1,eeg2,eeg3,eeg4,eeg5,eeg6,eeg7,eeg8,testfreq_e,testfreq_hz"
        );
        let first: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(first[0], "7"); // window_idx
        assert_eq!(first[1], "1"); // ActiveCalib
        assert_eq!(first[4], "0"); // sample_idx
        assert_eq!(first[13], "3"); // testfreq_e for 10 Hz
        assert_eq!(first[14], "10"); // testfreq_hz
    }

    #[test]
    fn csv_writer_prefers_trimmed_snapshot() {
        let tmp = TempDir::new().unwrap();
        let (mut w, snap) = filled_window();
        w.tick = 1;
        w.trim_snapshot(
            WINDOW_TRIM_SCANS * NUM_CH_CHUNK,
            WINDOW_TRIM_SCANS * NUM_CH_CHUNK,
        );
        assert!(w.is_trimmed);

        let mut csv = WindowCsvWriter::new();
        csv.log_window(
            &w,
            &snap,
            UiState::ActiveCalib,
            NUM_CH_CHUNK,
            true,
            tmp.path().to_str().unwrap(),
            "sess-b",
        );
        csv.close();

        let text = fs::read_to_string(tmp.path().join(WINDOW_CSV_NAME)).unwrap();
        let rows = text.lines().count() - 1;
        assert_eq!(rows, WINDOW_SCANS - 2 * WINDOW_TRIM_SCANS);
        // untrimmed hz column says unlabelled
        assert!(text.lines().nth(1).unwrap().ends_with(",0,-1"));
    }

    #[test]
    fn csv_writer_rebinds_on_session_change() {
        let tmp_a = TempDir::new().unwrap();
        let tmp_b = TempDir::new().unwrap();
        let (mut w, snap) = filled_window();
        w.tick = 1;

        let mut csv = WindowCsvWriter::new();
        csv.log_window(
            &w,
            &snap,
            UiState::HardwareChecks,
            NUM_CH_CHUNK,
            false,
            tmp_a.path().to_str().unwrap(),
            "sess-a",
        );
        w.tick = 2;
        csv.log_window(
            &w,
            &snap,
            UiState::HardwareChecks,
            NUM_CH_CHUNK,
            false,
            tmp_b.path().to_str().unwrap(),
            "sess-b",
        );
        csv.close();

        assert!(tmp_a.path().join(WINDOW_CSV_NAME).is_file());
        assert!(tmp_b.path().join(WINDOW_CSV_NAME).is_file());
        let b = fs::read_to_string(tmp_b.path().join(WINDOW_CSV_NAME)).unwrap();
        // the second file starts over with its own header
        assert!(b.starts_with("window_idx,"));
        assert_eq!(b.lines().count(), 1 + WINDOW_SCANS);
    }

    #[test]
    fn finalize_renames_dirs_and_requests_training() {
        let tmp = TempDir::new().unwrap();
        let sp = session::create_session_at(tmp.path(), "erin").unwrap();

        let store = StateStore::new();
        store.session_info.update(|s| {
            s.subject_id = sp.subject_id.clone();
            s.session_id = sp.session_id.clone();
            s.data_dir = sp.data_session_dir.to_string_lossy().into_owned();
            s.model_dir = sp.model_session_dir.to_string_lossy().into_owned();
        });

        let mut csv = WindowCsvWriter::new();
        handle_finalize(&store, &mut csv);

        let active = store.session_info.snapshot();
        assert!(!session::is_in_progress_session_id(&active.session_id));
        assert!(PathBuf::from(&active.data_dir).is_dir());
        assert!(PathBuf::from(&active.model_dir).is_dir());
        assert!(store.train_job_request.take());
    }

    #[test]
    fn finalize_without_session_is_ignored() {
        let store = StateStore::new();
        let mut csv = WindowCsvWriter::new();
        handle_finalize(&store, &mut csv);
        assert!(!store.train_job_request.take());
    }

    #[test]
    fn consumer_discards_windows_spanning_state_changes() {
        use crate::types::ACQ_RING_CAPACITY;
        use std::sync::Arc;

        let ring = Arc::new(ChunkRing::with_capacity(ACQ_RING_CAPACITY));
        let store = Arc::new(StateStore::new());
        store.set_ui_state(UiState::ActiveCalib);
        store.set_stim_freq(TestFreq::F10);

        let consumer = {
            let ring = Arc::clone(&ring);
            let store = Arc::clone(&store);
            std::thread::spawn(move || consumer_thread(&ring, &store))
        };

        // exactly the initial window's worth: the consumer fills it, reads
        // prev = Active_Calib, slides, then blocks mid-refill on an empty ring
        let chunks_for_first_window = (WINDOW_SCANS / NUM_SCANS_CHUNK) as u64;
        for tick in 0..chunks_for_first_window {
            ring.push(Chunk {
                tick,
                ..Chunk::default()
            })
            .unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(100));

        // the UI moves on while the window is still refilling; the refill
        // must abort and the window be discarded
        store.set_ui_state(UiState::Home);
        for tick in 0..4u64 {
            ring.push(Chunk {
                tick: 100 + tick,
                ..Chunk::default()
            })
            .unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
        ring.close();
        store.shutdown();
        consumer.join().unwrap();
        assert_eq!(
            store.windows_emitted.load(std::sync::atomic::Ordering::Relaxed),
            0
        );
    }
}
