//! Audio synchronization pure functions (§4.4): the exponential drift
//! accumulator and the sample-count stretch/compress decision, pulled out of
//! the callback so they're testable without a decoder, resampler or device.

/// `SDL_AUDIO_BUFFER_SIZE` in the original source; the device's requested
/// frames-per-callback, used to size the sync correction threshold.
pub const AUDIO_BUFFER_SIZE: u32 = 1024;
const AUDIO_DIFF_AVG_NB: u32 = 20;

/// `exp(ln(0.01) / AUDIO_DIFF_AVG_NB)` — decay factor for the exponential
/// moving accumulator.
fn diff_coef() -> f64 {
    (0.01f64.ln() / AUDIO_DIFF_AVG_NB as f64).exp()
}

/// Running state of the drift accumulator, confined to the audio worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffAccumulator {
    cum: f64,
    count: u32,
}

impl DiffAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in one more `diff` sample (`audio_clock - master_clock()`) and
    /// returns the warmed-up average, or `None` during the first
    /// `AUDIO_DIFF_AVG_NB` samples.
    pub fn update(&mut self, diff: f64) -> Option<f64> {
        let coef = diff_coef();
        self.cum = diff + coef * self.cum;
        self.count += 1;
        if self.count < AUDIO_DIFF_AVG_NB {
            None
        } else {
            Some(self.cum * (1.0 - coef))
        }
    }

    /// §4.4: "if `|diff| >= 10s`, clear the accumulator and counter".
    pub fn maybe_resync(&mut self, diff: f64) {
        if diff.abs() >= 10.0 {
            self.cum = 0.0;
            self.count = 0;
        }
    }
}

/// Threshold below which no correction is applied: `2 * AUDIO_BUFFER_SIZE / sample_rate`.
pub fn threshold(sample_rate: u32) -> f64 {
    2.0 * AUDIO_BUFFER_SIZE as f64 / sample_rate as f64
}

/// §4.4's `wanted_size` computation, clamped to a 10% band around
/// `samples_size` — see spec.md §9 open question 1: the reference's integer
/// arithmetic collapses this band to `{0, samples_size}`, but the intent (a
/// genuine 10% band) is treated as canonical here.
pub fn wanted_size(samples_size: usize, diff: f64, sample_rate: u32, channels: u16) -> usize {
    let wanted = samples_size as f64 + diff * sample_rate as f64 * (2.0 * channels as f64);
    let min = samples_size as f64 * 0.9;
    let max = samples_size as f64 * 1.1;
    wanted.clamp(min.min(max), min.max(max)).round() as usize
}

/// Truncates or tail-pads `chunk` (a raw interleaved s16 buffer) to exactly
/// `wanted` bytes, padding by repeating the final sample-frame — see
/// spec.md §9 open question 2.
pub fn apply_correction(chunk: &mut Vec<u8>, wanted: usize, bytes_per_sample_frame: usize) {
    use std::cmp::Ordering;
    match wanted.cmp(&chunk.len()) {
        Ordering::Less => chunk.truncate(wanted),
        Ordering::Greater => {
            if bytes_per_sample_frame == 0 || chunk.len() < bytes_per_sample_frame {
                chunk.resize(wanted, 0);
                return;
            }
            let tail_start = chunk.len() - bytes_per_sample_frame;
            let tail = chunk[tail_start..].to_vec();
            while chunk.len() + bytes_per_sample_frame <= wanted {
                chunk.extend_from_slice(&tail);
            }
            chunk.resize(wanted, 0);
        }
        Ordering::Equal => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn accumulator_warms_up_before_reporting() {
        let mut acc = DiffAccumulator::new();
        for _ in 0..19 {
            assert!(acc.update(0.05).is_none());
        }
        assert!(acc.update(0.05).is_some());
    }

    #[test]
    fn accumulator_resyncs_on_large_diff() {
        let mut acc = DiffAccumulator::new();
        for _ in 0..25 {
            acc.update(0.2);
        }
        acc.maybe_resync(10.5);
        assert_eq!(acc.cum, 0.0);
        assert_eq!(acc.count, 0);
    }

    #[test]
    fn threshold_scales_with_sample_rate() {
        assert_abs_diff_eq!(threshold(44100), 2.0 * 1024.0 / 44100.0, epsilon = 1e-12);
    }

    #[test]
    fn wanted_size_clamped_to_ten_percent_band() {
        let huge_positive_diff = 100.0;
        let w = wanted_size(1000, huge_positive_diff, 44100, 2);
        assert_eq!(w, 1100);

        let huge_negative_diff = -100.0;
        let w = wanted_size(1000, huge_negative_diff, 44100, 2);
        assert_eq!(w, 900);
    }

    #[test]
    fn apply_correction_truncates_when_smaller() {
        let mut chunk = vec![1u8; 100];
        apply_correction(&mut chunk, 40, 4);
        assert_eq!(chunk.len(), 40);
    }

    #[test]
    fn apply_correction_pads_by_repeating_final_frame() {
        let mut chunk = vec![0u8, 0, 0, 0, 9, 9, 9, 9]; // two 4-byte frames
        apply_correction(&mut chunk, 16, 4);
        assert_eq!(chunk.len(), 16);
        assert_eq!(&chunk[8..12], &[9, 9, 9, 9]);
        assert_eq!(&chunk[12..16], &[9, 9, 9, 9]);
    }
}
