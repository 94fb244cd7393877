use std::collections::VecDeque;

use crate::ExtractorConfig;

/// Single-step exponential blend of the previous and the new frequency.
///
/// Lands exactly on `raw` once held constant: when rounding stops the blend
/// from moving it snaps to `raw`.
pub fn smooth(previous: f64, raw: f64, alpha: f64) -> f64 {
    let next = raw + alpha * (previous - raw);
    if next == previous {
        raw
    } else {
        next
    }
}

/// Arithmetic mean over the last `capacity` values pushed.
#[derive(Debug, Clone)]
pub struct Damper {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Damper {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Pushes a value and returns the mean of the window. Until the window
    /// has filled up the mean covers only the values seen so far.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        // Offsets from the oldest value, so a uniform window is returned as is.
        let base = self.values[0];
        let offsets: f64 = self.values.iter().map(|v| v - base).sum();
        base + offsets / self.values.len() as f64
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Smoothing and damping state, advanced once per processing tick.
#[derive(Debug, Clone)]
pub struct FrequencyState {
    current: f64,
    previous: f64,
    alpha: f64,
    damper: Damper,
}

impl FrequencyState {
    pub fn new(alpha: f64, damping_window: usize) -> Self {
        Self {
            current: 0.0,
            previous: 0.0,
            alpha,
            damper: Damper::new(damping_window),
        }
    }

    /// Feeds one raw frequency through smoothing then damping and returns the
    /// frequency to display.
    pub fn update(&mut self, raw: f64) -> f64 {
        self.previous = self.current;
        self.current = smooth(self.previous, raw, self.alpha);
        self.damper.push(self.current)
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn previous(&self) -> f64 {
        self.previous
    }

    pub fn reset(&mut self) {
        self.current = 0.0;
        self.previous = 0.0;
        self.damper.clear();
    }
}

/// Two-segment frequency to hue mapping.
///
/// Below `max_useful_freq` the hue grows linearly up to `useful_freq_hue`.
/// Above it the remaining hues are scaled by `freq / max_freq`, which is not
/// continuous with the lower segment at the threshold. Keep it that way until
/// the product side decides otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HueMapping {
    pub max_freq: f64,
    pub max_useful_freq: f64,
    pub total_hues: f64,
    pub useful_freq_hue: f64,
}

impl HueMapping {
    pub fn hue(&self, freq: f64) -> f64 {
        if freq <= self.max_useful_freq {
            freq / self.max_useful_freq * self.useful_freq_hue
        } else {
            self.useful_freq_hue
                + (self.total_hues - self.useful_freq_hue) * (freq / self.max_freq)
        }
    }

    /// Hue normalised to the gradient domain.
    pub fn position(&self, hue: f64) -> f64 {
        hue / self.total_hues
    }
}

impl From<&ExtractorConfig> for HueMapping {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            max_freq: config.max_freq,
            max_useful_freq: config.max_useful_freq,
            total_hues: config.total_hues,
            useful_freq_hue: config.useful_freq_hue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_mapping() -> HueMapping {
        HueMapping::from(&ExtractorConfig::default())
    }

    #[test]
    fn smoothing_blends_previous_and_raw() {
        assert_eq!(smooth(100.0, 200.0, 0.75), 125.0);
        assert_eq!(smooth(100.0, 200.0, 0.0), 200.0);
    }

    #[test]
    fn damper_converges_on_constant_input() {
        let mut damper = Damper::new(4);
        damper.push(1000.0);
        damper.push(200.0);
        let mut value = 0.0;
        for _ in 0..5 {
            value = damper.push(440.0);
        }
        assert_eq!(value, 440.0);
    }

    #[test]
    fn damper_averages_partial_window() {
        let mut damper = Damper::new(4);
        assert_eq!(damper.push(100.0), 100.0);
        assert_eq!(damper.push(300.0), 200.0);
    }

    #[test]
    fn state_without_smoothing_converges_exactly() {
        let mut state = FrequencyState::new(0.0, 3);
        state.update(900.0);
        let mut displayed = 0.0;
        for _ in 0..4 {
            displayed = state.update(600.0);
        }
        assert_eq!(displayed, 600.0);
        assert_eq!(state.previous(), 600.0);
    }

    #[test]
    fn default_smoothing_converges_exactly() {
        let alpha = ExtractorConfig::default().smoothing_alpha;
        for target in [440.0, 2500.0, 602.9296875, 1234.567_890_123_4, 0.1] {
            for start in [1000.0, 0.0] {
                let mut state = FrequencyState::new(alpha, 4);
                state.update(start);
                let mut displayed = 0.0;
                for _ in 0..400 {
                    displayed = state.update(target);
                }
                assert_eq!(displayed, target, "alpha {alpha} from {start}");
            }
        }
    }

    #[test]
    fn typical_alphas_converge_exactly() {
        for alpha in [0.6, 0.65, 0.7, 0.75] {
            let mut state = FrequencyState::new(alpha, 4);
            state.update(1000.0);
            let mut displayed = 0.0;
            for _ in 0..400 {
                displayed = state.update(440.0);
            }
            assert_eq!(displayed, 440.0, "alpha {alpha}");
        }
    }

    #[test]
    fn damper_mean_of_a_uniform_window_is_exact() {
        let value = 1234.567_890_123_4;
        let mut damper = Damper::new(3);
        for _ in 0..3 {
            damper.push(value);
        }
        assert_eq!(damper.mean(), value);
    }

    #[test]
    fn state_tracks_previous_frequency() {
        let mut state = FrequencyState::new(0.5, 1);
        assert_eq!(state.update(400.0), 200.0);
        assert_eq!(state.update(400.0), 300.0);
        assert_eq!(state.previous(), 200.0);
        assert_eq!(state.current(), 300.0);
    }

    #[test]
    fn lower_segment_is_linear() {
        let mapping = default_mapping();
        assert_eq!(mapping.hue(0.0), 0.0);
        assert_eq!(mapping.hue(600.0), 155.0);
        assert_eq!(mapping.hue(1200.0), 310.0);
    }

    #[test]
    fn upper_segment_keeps_its_discontinuity() {
        let mapping = default_mapping();
        // 310 + 10 * 1201 / 2500
        let hue = mapping.hue(1201.0);
        assert!((hue - 314.804).abs() < 1e-9);
        assert!(hue - mapping.hue(1200.0) > 4.0);
        assert_eq!(mapping.hue(2500.0), 320.0);
        assert_eq!(mapping.position(320.0), 1.0);
    }
}
