//! Exponentially weighted rate estimation.
//!
//! Each sample updates the estimate as
//!
//! ```text
//! rate = (1 - e^(-dt/K)) * size / dt + e^(-dt/K) * rate
//! ```
//!
//! where `K` is the averaging time constant. Samples arriving at the same
//! instant add `size / K` directly. Rates are in bytes per second; time is
//! passed in microseconds so simulations control the clock.

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// An exponentially averaged byte-rate estimator.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    /// Averaging time constant in seconds.
    time_constant_s: f64,
    /// Current estimate in bytes per second.
    rate: f64,
    /// Time of the last sample.
    last_us: u64,
}

impl RateEstimator {
    /// Creates an estimator with a zero rate starting at `now_us`.
    ///
    /// # Panics
    /// Panics if `time_constant_us` is zero.
    #[must_use]
    pub fn new(time_constant_us: u64, now_us: u64) -> Self {
        assert!(time_constant_us > 0, "rate time constant must be positive");
        #[allow(clippy::cast_precision_loss)]
        let time_constant_s = time_constant_us as f64 / MICROS_PER_SEC;
        Self {
            time_constant_s,
            rate: 0.0,
            last_us: now_us,
        }
    }

    /// Records `bytes` arriving at `now_us` and returns the new estimate.
    pub fn estimate(&mut self, now_us: u64, bytes: u32) -> f64 {
        let size = f64::from(bytes);
        let dt = elapsed_s(self.last_us, now_us);
        if dt <= 0.0 {
            self.rate += size / self.time_constant_s;
        } else {
            let decay = (-dt / self.time_constant_s).exp();
            self.rate = (1.0 - decay) * (size / dt) + decay * self.rate;
        }
        self.last_us = self.last_us.max(now_us);
        self.rate
    }

    /// The estimate as of the last sample.
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    /// The estimate decayed to `now_us`, assuming nothing arrived since.
    #[must_use]
    pub fn get(&self, now_us: u64) -> f64 {
        let dt = elapsed_s(self.last_us, now_us);
        if dt <= 0.0 {
            return self.rate;
        }
        self.rate * (-dt / self.time_constant_s).exp()
    }

    /// Time of the last sample.
    #[must_use]
    pub const fn last_sample_us(&self) -> u64 {
        self.last_us
    }
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_s(from_us: u64, to_us: u64) -> f64 {
    to_us.saturating_sub(from_us) as f64 / MICROS_PER_SEC
}
