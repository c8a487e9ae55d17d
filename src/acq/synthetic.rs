//! Synthetic 250 Hz EEG stream mimicking the Unicorn headset.
//!
//! Produces digitized, scaled values in microvolts with the same time-major
//! interleave the hardware getData() call uses. The SSVEP component follows
//! whatever stimulus frequency the controller last published; phase is
//! carried across calls so the stream stays continuous. Single-threaded by
//! design; only the producer may own it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::acq::AcqProvider;
use crate::types::{NUM_CH_CHUNK, SAMPLE_RATE_HZ};

const TWO_PI: f64 = std::f64::consts::PI * 2.0;
const RNG_SEED: u64 = 0xC0FFEE;

/// One background oscillation: frequency, amplitude, on/off.
#[derive(Clone, Copy, Debug)]
pub struct WaveComponent {
    pub freq_hz: f64,
    pub amp_uv: f64,
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct SynthConfig {
    pub ssvep_amplitude_uv: f64,
    pub noise_sigma_uv: f64,
    pub dc_drift: WaveComponent,
    pub alpha: WaveComponent,
    pub beta: WaveComponent,
    pub line_noise: WaveComponent,
    /// Rectangular ~80 uV pulses every 3-7 s, ~100 ms long (blinks, motion).
    pub occasional_artifacts: bool,
    /// Sleep one chunk period per getData call, mimicking the 250 Hz
    /// hardware cadence. Off for deterministic tests.
    pub paced: bool,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            ssvep_amplitude_uv: 20.0,
            noise_sigma_uv: 5.0,
            dc_drift: WaveComponent {
                freq_hz: 0.1,
                amp_uv: 3.0,
                enabled: false,
            },
            alpha: WaveComponent {
                freq_hz: 10.0,
                amp_uv: 4.0,
                enabled: false,
            },
            beta: WaveComponent {
                freq_hz: 20.0,
                amp_uv: 3.0,
                enabled: false,
            },
            line_noise: WaveComponent {
                freq_hz: 60.0,
                amp_uv: 5.0,
                enabled: false,
            },
            occasional_artifacts: false,
            paced: false,
        }
    }
}

pub struct SyntheticAcquisition {
    config: SynthConfig,
    active_stimulus_hz: f64,
    sample_count: u64,

    rng: StdRng,

    // persistent phases so the waves stay continuous across getData calls
    ssvep_phase: f64,
    drift_phase: f64,
    alpha_phase: f64,
    beta_phase: f64,
    line_phase: f64,

    artifact_samples_left: u64,
    samples_to_next_artifact: u64,
}

impl SyntheticAcquisition {
    pub fn new(config: SynthConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(RNG_SEED);
        let samples_to_next_artifact = if config.occasional_artifacts {
            // first artifact 3-7 seconds in
            let delay_sec = 3.0 + 4.0 * rng.gen::<f64>();
            (delay_sec * SAMPLE_RATE_HZ) as u64
        } else {
            0
        };
        Self {
            config,
            active_stimulus_hz: 0.0,
            sample_count: 0,
            rng,
            ssvep_phase: 0.0,
            drift_phase: 0.0,
            alpha_phase: 0.0,
            beta_phase: 0.0,
            line_phase: 0.0,
            artifact_samples_left: 0,
            samples_to_next_artifact,
        }
    }

    fn gauss(&mut self) -> f64 {
        // Box-Muller; fine at this rate
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (TWO_PI * u2).cos()
    }

    fn background_sample(&mut self) -> f64 {
        let dt = 1.0 / SAMPLE_RATE_HZ;
        let mut bg = 0.0;

        let mut advance = |phase: &mut f64, comp: &WaveComponent| -> f64 {
            if !comp.enabled {
                return 0.0;
            }
            let v = comp.amp_uv * phase.sin();
            *phase += TWO_PI * comp.freq_hz * dt;
            if *phase >= TWO_PI {
                *phase -= TWO_PI;
            }
            v
        };

        bg += advance(&mut self.drift_phase, &self.config.dc_drift);
        bg += advance(&mut self.alpha_phase, &self.config.alpha);
        bg += advance(&mut self.beta_phase, &self.config.beta);
        bg += advance(&mut self.line_phase, &self.config.line_noise);

        if self.config.occasional_artifacts {
            if self.artifact_samples_left > 0 {
                bg += 80.0;
                self.artifact_samples_left -= 1;
            } else if self.samples_to_next_artifact == 0 {
                self.artifact_samples_left = (0.1 * SAMPLE_RATE_HZ) as u64;
                let delay_sec = 3.0 + 4.0 * self.rng.gen::<f64>();
                self.samples_to_next_artifact = (delay_sec * SAMPLE_RATE_HZ) as u64;
            } else {
                self.samples_to_next_artifact -= 1;
            }
        }
        bg
    }

    fn ssvep_sample(&mut self) -> f64 {
        if self.active_stimulus_hz <= 0.0 {
            return 0.0;
        }
        let v = self.config.ssvep_amplitude_uv * self.ssvep_phase.sin();
        self.ssvep_phase += TWO_PI * self.active_stimulus_hz / SAMPLE_RATE_HZ;
        if self.ssvep_phase >= TWO_PI {
            self.ssvep_phase -= TWO_PI;
        }
        v
    }

    fn synthesize(&mut self, dest: &mut [f32], num_scans: usize) {
        let noise_uv = self.config.noise_sigma_uv;
        for scan in 0..num_scans {
            let bg = self.background_sample();
            let ssvep = self.ssvep_sample();
            for ch in 0..NUM_CH_CHUNK {
                let noise = noise_uv * self.gauss();
                dest[scan * NUM_CH_CHUNK + ch] = (noise + bg + ssvep) as f32;
            }
            self.sample_count += 1;
        }
    }
}

impl AcqProvider for SyntheticAcquisition {
    fn init(&mut self) -> bool {
        true // nothing to open
    }

    fn start(&mut self, _test_mode: bool) -> bool {
        true
    }

    fn stop_and_close(&mut self) -> bool {
        true
    }

    fn get_data(&mut self, num_scans: usize, dest: &mut [f32]) -> bool {
        if num_scans == 0 || dest.len() < num_scans * NUM_CH_CHUNK {
            return false;
        }
        if self.config.paced {
            std::thread::sleep(std::time::Duration::from_secs_f64(
                num_scans as f64 / SAMPLE_RATE_HZ,
            ));
        }
        self.synthesize(dest, num_scans);
        true
    }

    fn num_channels(&self) -> usize {
        NUM_CH_CHUNK
    }

    fn channel_labels(&self) -> Vec<String> {
        (1..=NUM_CH_CHUNK).map(|i| format!("EEG{i}")).collect()
    }

    fn set_active_stimulus_hz(&mut self, hz: f64) {
        // clamp away nonsense and anything past Nyquist
        self.active_stimulus_hz = hz.clamp(0.0, SAMPLE_RATE_HZ / 2.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NUM_SAMPLES_CHUNK, NUM_SCANS_CHUNK};

    #[test]
    fn fills_exactly_one_chunk() {
        let mut acq = SyntheticAcquisition::new(SynthConfig::default());
        let mut dest = [0.0f32; NUM_SAMPLES_CHUNK];
        assert!(acq.get_data(NUM_SCANS_CHUNK, &mut dest));
        // pure noise at sigma 5 uV: nothing should come near the hard gates
        assert!(dest.iter().all(|v| v.abs() < 50.0));
    }

    #[test]
    fn rejects_zero_scans_and_short_buffers() {
        let mut acq = SyntheticAcquisition::new(SynthConfig::default());
        let mut dest = [0.0f32; NUM_SAMPLES_CHUNK];
        assert!(!acq.get_data(0, &mut dest));
        let mut short = [0.0f32; 4];
        assert!(!acq.get_data(NUM_SCANS_CHUNK, &mut short));
    }

    #[test]
    fn stimulus_raises_power_at_target_frequency() {
        let cfg = SynthConfig {
            noise_sigma_uv: 0.5,
            ..SynthConfig::default()
        };
        let mut acq = SyntheticAcquisition::new(cfg);
        acq.set_active_stimulus_hz(10.0);
        let scans = 500; // 2 s
        let mut dest = vec![0.0f32; scans * NUM_CH_CHUNK];
        assert!(acq.get_data(scans, &mut dest));

        // correlate channel 0 against a 10 Hz quadrature pair
        let mut re = 0.0f64;
        let mut im = 0.0f64;
        for s in 0..scans {
            let t = s as f64 / SAMPLE_RATE_HZ;
            let v = f64::from(dest[s * NUM_CH_CHUNK]);
            re += v * (TWO_PI * 10.0 * t).cos();
            im += v * (TWO_PI * 10.0 * t).sin();
        }
        let power = (re * re + im * im).sqrt() / scans as f64;
        // 20 uV sinusoid projects to ~10 uV of quadrature magnitude
        assert!(power > 5.0, "10 Hz power too low: {power}");
    }

    #[test]
    fn stimulus_frequency_is_clamped() {
        let mut acq = SyntheticAcquisition::new(SynthConfig::default());
        acq.set_active_stimulus_hz(-3.0);
        assert_eq!(acq.active_stimulus_hz, 0.0);
        acq.set_active_stimulus_hz(1000.0);
        assert_eq!(acq.active_stimulus_hz, SAMPLE_RATE_HZ / 2.0);
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = SyntheticAcquisition::new(SynthConfig::default());
        let mut b = SyntheticAcquisition::new(SynthConfig::default());
        let mut da = [0.0f32; NUM_SAMPLES_CHUNK];
        let mut db = [0.0f32; NUM_SAMPLES_CHUNK];
        a.get_data(NUM_SCANS_CHUNK, &mut da);
        b.get_data(NUM_SCANS_CHUNK, &mut db);
        assert_eq!(da, db);
    }

    #[test]
    fn artifact_pulses_fire_on_schedule() {
        let cfg = SynthConfig {
            occasional_artifacts: true,
            noise_sigma_uv: 1.0,
            ..SynthConfig::default()
        };
        let mut acq = SyntheticAcquisition::new(cfg);
        // 10 seconds guarantees at least one 80 uV pulse
        let scans = (10.0 * SAMPLE_RATE_HZ) as usize;
        let mut dest = vec![0.0f32; scans * NUM_CH_CHUNK];
        assert!(acq.get_data(scans, &mut dest));
        assert!(dest.iter().any(|v| *v > 60.0));
    }
}
