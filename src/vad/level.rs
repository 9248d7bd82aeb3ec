//! Volume extraction: raw PCM to a 0-100 level, plus exponential smoothing.

/// Quietest level that still registers, in dBFS
const FLOOR_DBFS: f64 = -60.0;

/// RMS of 16-bit PCM mapped from -60..0 dBFS onto 0-100
pub fn pcm_level(samples: &[i16]) -> u8 {
    if samples.is_empty() {
        return 0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let x = f64::from(s) / f64::from(i16::MAX);
            x * x
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        return 0;
    }

    let dbfs = 20.0 * rms.log10();
    let level = (dbfs - FLOOR_DBFS) / -FLOOR_DBFS * 100.0;
    level.clamp(0.0, 100.0).round() as u8
}

/// Exponential smoothing: `value = value * (1 - factor) + input * factor`
#[derive(Debug, Clone)]
pub struct Smoother {
    factor: f32,
    value: f32,
}

impl Smoother {
    pub fn new(factor: f32) -> Self {
        Self {
            factor: factor.clamp(0.0, 1.0),
            value: 0.0,
        }
    }

    /// Feed one reading and return the rounded smoothed level
    pub fn push(&mut self, input: u8) -> u8 {
        self.value = self.value * (1.0 - self.factor) + f32::from(input) * self.factor;
        self.current()
    }

    pub fn current(&self) -> u8 {
        self.value.round().clamp(0.0, 100.0) as u8
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}
