//! Second-order Butterworth low-pass filtering for N-dimensional signals.
//!
//! The filter is used to produce the smoothed torso velocity published
//! alongside the fused estimate. It starts out by averaging the incoming
//! samples and only switches to the recursive Butterworth form once one time
//! constant worth of samples has been seen, so the output does not ring while
//! the signal settles from an arbitrary start value.

use std::{f64::consts::PI, time::Duration};

use nalgebra::SVector;

/// A second-order Butterworth low-pass filter for N-dimensional signals,
/// initialized with the arithmetic mean of the first samples.
///
/// # Example
///
/// ```rust
/// use legged_state_estimator::low_pass_filter::MeanInitializedLowPass;
/// use nalgebra::Vector3;
/// use std::time::Duration;
///
/// let mut filter =
///     MeanInitializedLowPass::<3>::new(Duration::from_millis(10), Duration::from_micros(2500));
///
/// // While collecting the initial samples the output is their running mean.
/// assert_eq!(filter.filter(Vector3::from_element(1.0)), Vector3::from_element(1.0));
/// assert_eq!(filter.filter(Vector3::from_element(2.0)), Vector3::from_element(1.5));
/// assert!(!filter.is_initialized());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct MeanInitializedLowPass<const N: usize> {
    /// Number of samples averaged while initializing.
    sample_count: u32,
    /// Whether the recursive filter state has been seeded.
    initialized: bool,
    /// Numerator coefficients.
    b: [f64; 3],
    /// Denominator coefficients, assuming `a0 = 1`.
    a: [f64; 2],
    /// Time constant of the filter.
    tau: Duration,
    /// Time between two samples.
    sampling_period: Duration,
    /// Direct form II transposed state, or the running sum while initializing.
    state: [SVector<f64, N>; 2],
    /// Most recent output.
    last_output: SVector<f64, N>,
}

impl<const N: usize> MeanInitializedLowPass<N> {
    /// Creates a filter with time constant `tau` for samples arriving every
    /// `sampling_period`.
    #[must_use]
    pub fn new(tau: Duration, sampling_period: Duration) -> Self {
        let (b, a) = second_order_butterworth(tau, sampling_period);
        Self {
            sample_count: 0,
            initialized: false,
            b,
            a,
            tau,
            sampling_period,
            state: [SVector::zeros(), SVector::zeros()],
            last_output: SVector::zeros(),
        }
    }

    /// Filters `x` and returns the filtered value.
    #[must_use]
    pub fn filter(&mut self, x: SVector<f64, N>) -> SVector<f64, N> {
        if !self.initialized {
            return self.filter_arithmetic_mean(x);
        }

        let y = self.b[0] * x + self.state[0];
        self.state[0] = self.b[1] * x - self.a[0] * y + self.state[1];
        self.state[1] = self.b[2] * x - self.a[1] * y;
        self.last_output = y;
        y
    }

    /// Seeds the filter as if it had been fed `value` forever.
    pub fn initialize_with_value(&mut self, value: SVector<f64, N>) {
        self.sample_count = 0;
        self.initialized = true;
        self.last_output = value;
        self.state = self.steady_state(value);
    }

    /// Whether the initial averaging phase is over.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The most recent output.
    #[must_use]
    pub fn last_output(&self) -> SVector<f64, N> {
        self.last_output
    }

    fn filter_arithmetic_mean(&mut self, x: SVector<f64, N>) -> SVector<f64, N> {
        self.sample_count += 1;
        self.state[1] += x;
        let mean = self.state[1] / f64::from(self.sample_count);

        let elapsed = self.sampling_period.checked_mul(self.sample_count);
        if matches!(elapsed, Some(elapsed) if elapsed < self.tau) {
            self.last_output = mean;
        } else {
            self.initialize_with_value(mean);
        }
        mean
    }

    fn steady_state(&self, value: SVector<f64, N>) -> [SVector<f64, N>; 2] {
        [value * (1.0 - self.b[0]), value * (self.b[2] - self.a[1])]
    }
}

/// Numerator (`b`) and denominator (`a`) coefficients of a second-order
/// Butterworth low-pass filter.
///
/// The time constant $\tau$ maps to the cutoff frequency as
/// $$f_c = \frac{\sqrt{2}}{2 \pi \tau}$$
#[must_use]
pub fn second_order_butterworth(tau: Duration, sampling_period: Duration) -> ([f64; 3], [f64; 2]) {
    let tau = tau.as_secs_f64();
    let ts = sampling_period.as_secs_f64();

    let fc = 2_f64.sqrt() / (2.0 * PI * tau);
    let c = (PI * fc * ts).tan();
    let d = c.powi(2) + 2_f64.sqrt() * c + 1.0;

    let b0 = c.powi(2) / d;
    let a1 = (2.0 * (c.powi(2) - 1.0)) / d;
    let a2 = (1.0 - 2_f64.sqrt() * c + c.powi(2)) / d;

    ([b0, 2.0 * b0, b0], [a1, a2])
}
