//! A bank of independent scalar Kalman filters tracking velocities.
//!
//! Each of the `N` channels estimates one velocity component from a direct,
//! noisy velocity measurement, using the measured acceleration as the control
//! input of the process model:
//!
//! $$\hat{x}^- = \hat{x} + a \Delta t, \qquad P^- = P + Q$$
//! $$K = \frac{P^-}{P^- + R}, \qquad \hat{x} = \hat{x}^- + K (z - \hat{x}^-),
//! \qquad P = (1 - K) P^-$$
//!
//! with $Q = \sigma_{sys}^2$ and $R = \sigma_{mea}^2$. Channels never couple.

use nalgebra::SVector;

/// Covariance a channel starts from, and is reset to after divergence.
pub const DEFAULT_INITIAL_COVARIANCE: f64 = 1.0;

/// Covariance above which a channel is considered diverged.
pub const DEFAULT_HIGH_SUSPECT_NUMBER: f64 = 100.0;

/// A bank of `N` scalar velocity Kalman filters.
///
/// # Example
///
/// ```rust
/// use legged_state_estimator::kalman::VelKalmanFilter;
/// use nalgebra::Vector1;
///
/// let mut filter = VelKalmanFilter::<1>::new(0.0, 0.2, 0.0025);
///
/// let first = filter.update(Vector1::new(1.0), Vector1::zeros());
/// let second = filter.update(Vector1::new(1.0), Vector1::zeros());
///
/// // The estimate approaches the measured velocity from below.
/// assert!(first.x < second.x && second.x < 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct VelKalmanFilter<const N: usize> {
    /// Standard deviation of the process noise.
    sys_noise: f64,
    /// Standard deviation of the measurement noise.
    mea_noise: f64,
    /// Sampling period in seconds.
    dt: f64,
    /// Covariance above which a channel is reset.
    high_suspect_number: f64,
    /// Covariance used at start-up and after a reset.
    initial_covariance: f64,
    /// Current estimate per channel.
    estimate: SVector<f64, N>,
    /// Estimation error covariance per channel.
    covariance: SVector<f64, N>,
    /// Number of filter steps performed.
    iterations: u64,
    /// Number of divergence resets performed.
    resets: u64,
}

impl<const N: usize> VelKalmanFilter<N> {
    /// Creates a filter bank from the process and measurement noise standard
    /// deviations and the sampling period `dt` in seconds.
    #[must_use]
    pub fn new(sys_noise: f64, mea_noise: f64, dt: f64) -> Self {
        Self {
            sys_noise,
            mea_noise,
            dt,
            high_suspect_number: DEFAULT_HIGH_SUSPECT_NUMBER,
            initial_covariance: DEFAULT_INITIAL_COVARIANCE,
            estimate: SVector::zeros(),
            covariance: SVector::from_element(DEFAULT_INITIAL_COVARIANCE),
            iterations: 0,
            resets: 0,
        }
    }

    /// Sets the covariance above which a channel is reset.
    #[must_use]
    pub fn with_divergence_threshold(mut self, high_suspect_number: f64) -> Self {
        self.high_suspect_number = high_suspect_number;
        self
    }

    /// Sets the covariance every channel starts from and is reset to.
    #[must_use]
    pub fn with_initial_covariance(mut self, initial_covariance: f64) -> Self {
        self.initial_covariance = initial_covariance;
        self.covariance = SVector::from_element(initial_covariance);
        self
    }

    /// Process noise variance $Q$.
    #[inline]
    #[must_use]
    fn q(&self) -> f64 {
        self.sys_noise.powi(2)
    }

    /// Measurement noise variance $R$.
    #[inline]
    #[must_use]
    fn r(&self) -> f64 {
        self.mea_noise.powi(2)
    }

    /// Runs one predict and update step per channel and returns the new
    /// estimate.
    ///
    /// # Note
    ///
    /// A channel whose covariance exceeds the divergence threshold, or whose
    /// state became non-finite, is reinitialised: the covariance goes back to
    /// its initial value and the estimate snaps to the raw measurement (or to
    /// the prediction, when the measurement itself is not finite).
    pub fn update(
        &mut self,
        measurement: SVector<f64, N>,
        acceleration: SVector<f64, N>,
    ) -> SVector<f64, N> {
        let q = self.q();
        let r = self.r();

        for i in 0..N {
            let x_pred = self.estimate[i] + acceleration[i] * self.dt;
            let p_pred = self.covariance[i] + q;

            let gain = p_pred / (p_pred + r);
            let x = x_pred + gain * (measurement[i] - x_pred);
            let p = (1.0 - gain) * p_pred;

            if self.diverged(x, p) {
                log::warn!(
                    "velocity filter channel {i} diverged (P = {p}), resetting to measurement"
                );
                self.estimate[i] = if measurement[i].is_finite() {
                    measurement[i]
                } else if x_pred.is_finite() {
                    x_pred
                } else {
                    0.0
                };
                self.covariance[i] = self.initial_covariance;
                self.resets += 1;
            } else {
                self.estimate[i] = x;
                self.covariance[i] = p;
            }
        }

        self.iterations += 1;
        self.estimate
    }

    /// Runs the predict step only, integrating `acceleration` without a
    /// measurement correction.
    ///
    /// Used while no velocity measurement is available. A diverged channel
    /// has its covariance reset but keeps its estimate, unless the estimate
    /// itself is non-finite, in which case it restarts from zero.
    pub fn predict(&mut self, acceleration: SVector<f64, N>) -> SVector<f64, N> {
        let q = self.q();

        for i in 0..N {
            let x = self.estimate[i] + acceleration[i] * self.dt;
            let p = self.covariance[i] + q;

            if self.diverged(x, p) {
                log::warn!("velocity filter channel {i} diverged during prediction (P = {p})");
                self.estimate[i] = if x.is_finite() { x } else { 0.0 };
                self.covariance[i] = self.initial_covariance;
                self.resets += 1;
            } else {
                self.estimate[i] = x;
                self.covariance[i] = p;
            }
        }

        self.iterations += 1;
        self.estimate
    }

    fn diverged(&self, x: f64, p: f64) -> bool {
        !x.is_finite() || !p.is_finite() || p > self.high_suspect_number
    }

    /// The current estimate.
    #[must_use]
    pub fn estimate(&self) -> SVector<f64, N> {
        self.estimate
    }

    /// The current estimation error covariance per channel.
    #[must_use]
    pub fn covariance(&self) -> SVector<f64, N> {
        self.covariance
    }

    /// Number of filter steps performed so far.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Number of divergence resets performed so far.
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Number of independent channels.
    #[must_use]
    pub const fn channels(&self) -> usize {
        N
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector1, Vector3};

    #[test]
    fn converges_with_decreasing_covariance() {
        let mut filter = VelKalmanFilter::<1>::new(0.0, 0.2, 0.0025);

        let mut last_estimate = filter.estimate().x;
        let mut last_covariance = filter.covariance().x;
        for _ in 0..3 {
            let estimate = filter.update(Vector1::new(1.0), Vector1::zeros()).x;
            let covariance = filter.covariance().x;

            assert!(estimate > last_estimate);
            assert!(estimate <= 1.0);
            assert!(covariance < last_covariance);

            last_estimate = estimate;
            last_covariance = covariance;
        }

        assert_relative_eq!(last_estimate, 1.0, epsilon = 0.02);
        assert_eq!(filter.iterations(), 3);
    }

    #[test]
    fn first_step_matches_closed_form() {
        let mut filter = VelKalmanFilter::<1>::new(0.0, 0.2, 0.0025);
        let estimate = filter.update(Vector1::new(1.0), Vector1::zeros()).x;

        // P- = 1, R = 0.04, K = 1 / 1.04
        assert_relative_eq!(estimate, 1.0 / 1.04, epsilon = 1e-12);
        assert_relative_eq!(filter.covariance().x, 0.04 / 1.04, epsilon = 1e-12);
    }

    #[test]
    fn covariance_non_increasing_with_process_noise() {
        let mut filter = VelKalmanFilter::<3>::new(0.05, 0.2, 0.0025);
        let mut last = filter.covariance();
        for _ in 0..200 {
            filter.update(Vector3::new(0.3, -0.1, 0.0), Vector3::zeros());
            let p = filter.covariance();
            for i in 0..3 {
                assert!(p[i] <= last[i] + 1e-15);
            }
            last = p;
        }
        assert_relative_eq!(filter.estimate(), Vector3::new(0.3, -0.1, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn channels_are_independent() {
        let mut filter = VelKalmanFilter::<3>::new(0.01, 0.2, 0.0025);
        for _ in 0..50 {
            filter.update(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros());
        }
        let estimate = filter.estimate();
        assert!(estimate.x > 0.9);
        assert_relative_eq!(estimate.y, 0.0);
        assert_relative_eq!(estimate.z, 0.0);
    }

    #[test]
    fn acceleration_drives_prediction() {
        let mut filter = VelKalmanFilter::<1>::new(0.0, 0.2, 0.01);
        let estimate = filter.predict(Vector1::new(2.0)).x;
        assert_relative_eq!(estimate, 0.02, epsilon = 1e-12);
        assert_relative_eq!(filter.covariance().x, DEFAULT_INITIAL_COVARIANCE);
    }

    #[test]
    fn diverged_channel_resets_to_measurement() {
        let mut filter = VelKalmanFilter::<1>::new(20.0, 1000.0, 0.0025);

        // P- = 1 + 400 with R = 1e6 keeps nearly all of P-, which exceeds 100.
        let estimate = filter.update(Vector1::new(0.7), Vector1::new(5.0)).x;

        assert_relative_eq!(estimate, 0.7);
        assert_relative_eq!(filter.covariance().x, DEFAULT_INITIAL_COVARIANCE);
        assert_eq!(filter.resets(), 1);
    }

    #[test]
    fn non_finite_measurement_is_absorbed() {
        let mut filter = VelKalmanFilter::<1>::new(0.0, 0.2, 0.0025);
        let estimate = filter.update(Vector1::new(f64::NAN), Vector1::zeros()).x;
        assert!(estimate.is_finite());
        assert_eq!(filter.resets(), 1);
        assert_relative_eq!(filter.covariance().x, DEFAULT_INITIAL_COVARIANCE);

        // the next finite measurement restores a finite estimate
        let estimate = filter.update(Vector1::new(0.5), Vector1::zeros()).x;
        assert!(estimate.is_finite());
    }

    #[test]
    fn long_prediction_resets_covariance_only() {
        let mut filter =
            VelKalmanFilter::<1>::new(1.0, 0.2, 0.0025).with_divergence_threshold(10.0);
        for _ in 0..9 {
            filter.predict(Vector1::new(4.0));
        }
        assert_eq!(filter.resets(), 0);
        assert_relative_eq!(filter.covariance().x, 10.0);

        filter.predict(Vector1::new(4.0));
        assert_eq!(filter.resets(), 1);
        assert_relative_eq!(filter.covariance().x, DEFAULT_INITIAL_COVARIANCE);
        assert_relative_eq!(filter.estimate().x, 10.0 * 4.0 * 0.0025, epsilon = 1e-12);
    }

    #[test]
    fn initial_covariance_builder() {
        let filter = VelKalmanFilter::<2>::new(0.0, 0.2, 0.0025).with_initial_covariance(4.0);
        assert_relative_eq!(filter.covariance(), nalgebra::Vector2::new(4.0, 4.0));
        assert_eq!(filter.channels(), 2);
    }
}
