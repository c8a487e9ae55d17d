//! Per-window signal quality assessment.
//!
//! Two gates decide whether a window is artifactual: hard amplitude/step
//! thresholds that fire immediately, and adaptive z-score thresholds on
//! kurtosis and histogram entropy against a rolling 45 s baseline. Stats
//! for every window land in a rolling ring with parallel sums so the
//! published averages stay O(channels) per window.

use std::collections::VecDeque;

use log::warn;

use crate::state_store::{ChannelAverages, SignalStats, StateStore};
use crate::types::{NUM_CH_CHUNK, SAMPLE_RATE_HZ, WINDOW_HOP_SCANS};
use crate::window::SlidingWindow;

pub const MAX_ABS_UV: f32 = 200.0;
pub const MAX_STEP_UV: f32 = 100.0;
pub const AMP_PERSIST_SAMPLES: usize = 2;
pub const STEP_PERSIST_SAMPLES: usize = 2;
pub const KURT_Z: f64 = 3.5;
pub const ENT_Z: f64 = 3.5;
pub const MIN_CH_FAIL_KURT: usize = 2;
pub const MIN_CH_FAIL_ENT: usize = 2;
pub const MIN_BASELINE_WINS: usize = 20;
pub const UI_UPDATE_EVERY_WIN: u64 = 10;
pub const BASELINE_WINDOW_SEC: f64 = 45.0;

const HIST_BINS: usize = 64;
const HIST_MIN_UV: f32 = -200.0;
const HIST_MAX_UV: f32 = 200.0;
const EPS_STD: f64 = 1e-6;

/// Per-channel statistics for one window.
#[derive(Clone, Debug, Default)]
pub struct WindowStats {
    pub mean_uv: [f32; NUM_CH_CHUNK],
    pub std_uv: [f32; NUM_CH_CHUNK],
    pub rms_uv: [f32; NUM_CH_CHUNK],
    pub max_abs_uv: [f32; NUM_CH_CHUNK],
    pub max_step_uv: [f32; NUM_CH_CHUNK],
    pub kurt: [f32; NUM_CH_CHUNK],
    pub entropy: [f32; NUM_CH_CHUNK],
    pub is_bad: bool,
}

#[derive(Clone, Debug, Default)]
struct RollingSums {
    mean_uv: [f64; NUM_CH_CHUNK],
    std_uv: [f64; NUM_CH_CHUNK],
    rms_uv: [f64; NUM_CH_CHUNK],
    kurt: [f64; NUM_CH_CHUNK],
    entropy: [f64; NUM_CH_CHUNK],
    kurt_sumsq: [f64; NUM_CH_CHUNK],
    ent_sumsq: [f64; NUM_CH_CHUNK],
    // rolling maxima, not sums
    max_abs_uv: [f32; NUM_CH_CHUNK],
    max_step_uv: [f32; NUM_CH_CHUNK],
}

pub struct SignalQualityAnalyzer {
    needed_wins: usize,
    ring: VecDeque<WindowStats>,
    sums: RollingSums,
    current_bad: usize,
    overall_bad: u64,
    total_windows: u64,
    ui_tick: u64,
    snapshot: Vec<f32>,
}

/// Baseline length: windows arriving every hop for 45 s.
pub fn baseline_window_count() -> usize {
    let hop_sec = WINDOW_HOP_SCANS as f64 / SAMPLE_RATE_HZ;
    (BASELINE_WINDOW_SEC / hop_sec).ceil() as usize
}

impl Default for SignalQualityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalQualityAnalyzer {
    pub fn new() -> Self {
        Self::with_baseline(baseline_window_count())
    }

    /// Baseline-length override, used by tests to exercise eviction quickly.
    pub fn with_baseline(needed_wins: usize) -> Self {
        Self {
            needed_wins: needed_wins.max(1),
            ring: VecDeque::with_capacity(needed_wins.max(1)),
            sums: RollingSums::default(),
            current_bad: 0,
            overall_bad: 0,
            total_windows: 0,
            ui_tick: 0,
            snapshot: Vec::new(),
        }
    }

    pub fn windows_in_baseline(&self) -> usize {
        self.ring.len()
    }

    /// Computes stats for the full window, applies both gates, updates the
    /// rolling baseline and flags `window.is_artifactual`. Publishes UI
    /// stats every [`UI_UPDATE_EVERY_WIN`] windows.
    pub fn assess_window(&mut self, window: &mut SlidingWindow, store: &StateStore) {
        let mut snap = std::mem::take(&mut self.snapshot);
        window.snapshot_into(&mut snap);
        let flagged = self.assess_samples(&snap, store);
        self.snapshot = snap;
        window.is_artifactual = flagged;
    }

    /// Same gate over a raw interleaved snapshot. Returns the artifact flag.
    pub fn assess_samples(&mut self, snap: &[f32], store: &StateStore) -> bool {
        if snap.is_empty() || snap.len() % NUM_CH_CHUNK != 0 {
            warn!(
                target: "consumer",
                "quality: snapshot of {} samples not divisible by {} channels; skipping",
                snap.len(),
                NUM_CH_CHUNK
            );
            return false;
        }
        let n_scans = snap.len() / NUM_CH_CHUNK;
        if n_scans < 2 {
            return false;
        }

        // (1) evict the oldest window if the baseline is full
        let mut evicted: Option<WindowStats> = None;
        if self.ring.len() == self.needed_wins {
            if let Some(old) = self.ring.pop_front() {
                if old.is_bad {
                    self.current_bad = self.current_bad.saturating_sub(1);
                }
                for ch in 0..NUM_CH_CHUNK {
                    self.sums.mean_uv[ch] -= f64::from(old.mean_uv[ch]);
                    self.sums.std_uv[ch] -= f64::from(old.std_uv[ch]);
                    self.sums.rms_uv[ch] -= f64::from(old.rms_uv[ch]);
                    self.sums.kurt[ch] -= f64::from(old.kurt[ch]);
                    self.sums.entropy[ch] -= f64::from(old.entropy[ch]);
                    self.sums.kurt_sumsq[ch] -=
                        f64::from(old.kurt[ch]) * f64::from(old.kurt[ch]);
                    self.sums.ent_sumsq[ch] -=
                        f64::from(old.entropy[ch]) * f64::from(old.entropy[ch]);
                }
                evicted = Some(old);
            }
        }

        self.total_windows += 1;

        // (2) per-channel stats + hard thresholds
        let mut stats = WindowStats::default();
        let mut fails_max = false;
        let mut fails_step = false;
        let mut fails_kurt_count = 0usize;
        let mut fails_ent_count = 0usize;
        let baseline_wins = self.ring.len();

        for ch in 0..NUM_CH_CHUNK {
            let mut sum = 0.0f64;
            let mut sumsq = 0.0f64;
            let mut max_abs = 0.0f32;
            let mut max_step = 0.0f32;
            let mut over_amp = 0usize;
            let mut over_step = 0usize;
            let mut prev = snap[ch];

            for s in 0..n_scans {
                let sample = snap[s * NUM_CH_CHUNK + ch];
                sum += f64::from(sample);
                sumsq += f64::from(sample) * f64::from(sample);

                let av = sample.abs();
                max_abs = max_abs.max(av);
                if av > MAX_ABS_UV {
                    over_amp += 1;
                }
                if s > 0 {
                    let step = (sample - prev).abs();
                    max_step = max_step.max(step);
                    if step > MAX_STEP_UV {
                        over_step += 1;
                    }
                }
                prev = sample;
            }

            let n = n_scans as f64;
            let mean = sum / n;
            let ex2 = sumsq / n;
            let var = (ex2 - mean * mean).max(0.0);
            stats.mean_uv[ch] = mean as f32;
            stats.std_uv[ch] = var.sqrt() as f32;
            stats.rms_uv[ch] = ex2.max(0.0).sqrt() as f32;
            stats.max_abs_uv[ch] = max_abs;
            stats.max_step_uv[ch] = max_step;
            stats.kurt[ch] = excess_kurtosis_channel(snap, ch, n_scans, mean);
            stats.entropy[ch] = hist_entropy_channel(snap, ch, n_scans);

            if over_amp >= AMP_PERSIST_SAMPLES {
                fails_max = true;
            }
            if over_step >= STEP_PERSIST_SAMPLES {
                fails_step = true;
            }

            // (3) adaptive thresholds once a baseline exists: kurtosis
            // unusually high, entropy unusually low
            if baseline_wins >= MIN_BASELINE_WINS {
                let inv_n = 1.0 / baseline_wins as f64;
                let mu_k = self.sums.kurt[ch] * inv_n;
                let mu_e = self.sums.entropy[ch] * inv_n;
                let var_k = (self.sums.kurt_sumsq[ch] * inv_n - mu_k * mu_k).max(0.0);
                let var_e = (self.sums.ent_sumsq[ch] * inv_n - mu_e * mu_e).max(0.0);
                let sd_k = var_k.sqrt() + EPS_STD;
                let sd_e = var_e.sqrt() + EPS_STD;

                if f64::from(stats.kurt[ch]) > mu_k + KURT_Z * sd_k {
                    fails_kurt_count += 1;
                }
                if f64::from(stats.entropy[ch]) < mu_e - ENT_Z * sd_e {
                    fails_ent_count += 1;
                }
            }
        }

        let is_bad = fails_max
            || fails_step
            || fails_kurt_count >= MIN_CH_FAIL_KURT
            || fails_ent_count >= MIN_CH_FAIL_ENT;
        stats.is_bad = is_bad;
        if is_bad {
            self.overall_bad += 1;
            self.current_bad += 1;
        }

        // (4) enqueue and add contributions
        for ch in 0..NUM_CH_CHUNK {
            self.sums.mean_uv[ch] += f64::from(stats.mean_uv[ch]);
            self.sums.std_uv[ch] += f64::from(stats.std_uv[ch]);
            self.sums.rms_uv[ch] += f64::from(stats.rms_uv[ch]);
            self.sums.kurt[ch] += f64::from(stats.kurt[ch]);
            self.sums.entropy[ch] += f64::from(stats.entropy[ch]);
            self.sums.kurt_sumsq[ch] += f64::from(stats.kurt[ch]) * f64::from(stats.kurt[ch]);
            self.sums.ent_sumsq[ch] += f64::from(stats.entropy[ch]) * f64::from(stats.entropy[ch]);
        }

        // (5) rolling maxima: constant-time update; only when the evicted
        // window held the current max does a linear rescan happen
        for ch in 0..NUM_CH_CHUNK {
            self.sums.max_abs_uv[ch] = self.sums.max_abs_uv[ch].max(stats.max_abs_uv[ch]);
            self.sums.max_step_uv[ch] = self.sums.max_step_uv[ch].max(stats.max_step_uv[ch]);
        }
        self.ring.push_back(stats);
        if let Some(old) = evicted {
            for ch in 0..NUM_CH_CHUNK {
                let was_max_abs = old.max_abs_uv[ch] >= self.sums.max_abs_uv[ch];
                let was_max_step = old.max_step_uv[ch] >= self.sums.max_step_uv[ch];
                if was_max_abs || was_max_step {
                    self.recompute_channel_maxima(ch);
                }
            }
        }

        // (6) publish on cadence
        self.ui_tick += 1;
        if self.ui_tick % UI_UPDATE_EVERY_WIN == 0 {
            self.publish_stats(store);
        }

        is_bad
    }

    fn recompute_channel_maxima(&mut self, ch: usize) {
        let mut max_abs = 0.0f32;
        let mut max_step = 0.0f32;
        for w in &self.ring {
            max_abs = max_abs.max(w.max_abs_uv[ch]);
            max_step = max_step.max(w.max_step_uv[ch]);
        }
        self.sums.max_abs_uv[ch] = max_abs;
        self.sums.max_step_uv[ch] = max_step;
    }

    /// Copies per-channel averages and bad-window rates into the shared
    /// stats record.
    pub fn publish_stats(&self, store: &StateStore) {
        let num_wins = self.ring.len();
        if num_wins == 0 {
            return;
        }
        let inv = 1.0 / num_wins as f64;
        let mut rolling = ChannelAverages::default();
        for ch in 0..NUM_CH_CHUNK {
            rolling.mean_uv[ch] = (self.sums.mean_uv[ch] * inv) as f32;
            rolling.std_uv[ch] = (self.sums.std_uv[ch] * inv) as f32;
            rolling.rms_uv[ch] = (self.sums.rms_uv[ch] * inv) as f32;
            rolling.kurt[ch] = (self.sums.kurt[ch] * inv) as f32;
            rolling.entropy[ch] = (self.sums.entropy[ch] * inv) as f32;
            rolling.max_abs_uv[ch] = self.sums.max_abs_uv[ch];
            rolling.max_step_uv[ch] = self.sums.max_step_uv[ch];
        }
        let overall = if self.total_windows > 0 {
            self.overall_bad as f32 / self.total_windows as f32
        } else {
            0.0
        };
        store.set_signal_stats(SignalStats {
            num_win_in_rolling: num_wins,
            rolling,
            current_bad_win_rate: self.current_bad as f32 / num_wins as f32,
            overall_bad_win_rate: overall,
        });
    }
}

/// Excess kurtosis `m4/m2^2 - 3` around the supplied mean.
fn excess_kurtosis_channel(snap: &[f32], ch: usize, n_scans: usize, mean: f64) -> f32 {
    let mut m2 = 0.0f64;
    let mut m4 = 0.0f64;
    for s in 0..n_scans {
        let d = f64::from(snap[s * NUM_CH_CHUNK + ch]) - mean;
        let d2 = d * d;
        m2 += d2;
        m4 += d2 * d2;
    }
    let n = n_scans as f64;
    m2 /= n;
    m4 /= n;
    if m2 < 1e-12 {
        return 0.0;
    }
    (m4 / (m2 * m2) - 3.0) as f32
}

/// Histogram entropy over 64 bins on [-200, +200] uV, natural log.
fn hist_entropy_channel(snap: &[f32], ch: usize, n_scans: usize) -> f32 {
    let mut hist = [0u32; HIST_BINS];
    let inv = 1.0 / (HIST_MAX_UV - HIST_MIN_UV);
    for s in 0..n_scans {
        let v = snap[s * NUM_CH_CHUNK + ch];
        let t = (v - HIST_MIN_UV) * inv;
        let b = ((t * HIST_BINS as f32) as i64).clamp(0, HIST_BINS as i64 - 1) as usize;
        hist[b] += 1;
    }
    let n = n_scans as f32;
    let mut h = 0.0f32;
    for &c in &hist {
        if c == 0 {
            continue;
        }
        let p = c as f32 / n;
        h -= p * p.ln();
    }
    h
}
