//! Gap (inter-packet spacing) predictors feeding the RTO estimators.

use std::collections::VecDeque;

/// History length before the AR(2) predictor is considered warmed up,
/// ported from `AR2_HISTORY_SIZE` in the reference system's
/// `rto/AR2Predictor.h`.
pub const AR2_HISTORY: usize = 100;

/// A strategy for predicting the next inter-packet gap from the history of
/// observed gaps, so the RTO estimator can be generic over the statistical
/// model instead of hard-coding one.
pub trait GapPredictor: Send {
    fn insert(&mut self, gap_millis: f64);
    fn predict(&self) -> Option<f64>;
    /// Standard deviation of this predictor's one-step-ahead prediction
    /// error, used to size the `μ + k·σ` timer deadline. `None` until
    /// enough residuals have been observed to estimate it.
    fn error_stddev(&self) -> Option<f64>;
    fn reset(&mut self);
}

/// Exponentially weighted moving average, used until the AR(2) predictor
/// has accumulated enough history to be trusted (or as the only predictor,
/// for a session that never needs AR(2)'s extra accuracy).
#[derive(Default)]
pub struct MovingAverage {
    mean: Option<f64>,
    /// EWMA of the squared prediction error, updated with the same `alpha`
    /// as the mean itself.
    error_var: Option<f64>,
    alpha: f64,
}

impl MovingAverage {
    pub fn new(alpha: f64) -> Self {
        Self {
            mean: None,
            error_var: None,
            alpha,
        }
    }
}

impl GapPredictor for MovingAverage {
    fn insert(&mut self, gap_millis: f64) {
        if let Some(mean) = self.mean {
            let residual = gap_millis - mean;
            self.error_var = Some(match self.error_var {
                Some(var) => var + self.alpha * (residual * residual - var),
                None => residual * residual,
            });
        }

        self.mean = Some(match self.mean {
            Some(mean) => mean + self.alpha * (gap_millis - mean),
            None => gap_millis,
        });
    }

    fn predict(&self) -> Option<f64> {
        self.mean
    }

    fn error_stddev(&self) -> Option<f64> {
        self.error_var.map(f64::sqrt)
    }

    fn reset(&mut self) {
        self.mean = None;
        self.error_var = None;
    }
}

/// Second-order autoregressive predictor over the recent gap history,
/// following the recursive autocorrelation update in the reference
/// system's `AR2Predictor`: the three lag-0/1/2 autocorrelations are
/// maintained incrementally as each new sample arrives, and the AR(2)
/// coefficients (`alpha_1`, `alpha_2`) are solved from them via the
/// Yule-Walker equations.
pub struct Ar2Predictor {
    history: VecDeque<f64>,
    n: u64,
    r0: f64,
    r1: f64,
    r2: f64,
    alpha1: f64,
    alpha2: f64,
    /// EWMA of the squared one-step-ahead prediction error, smoothed with
    /// the same `1/16` factor as the RFC 3550 interarrival jitter estimate.
    error_var: Option<f64>,
}

/// Smoothing factor for the residual-variance EWMA feeding [`error_stddev`].
const RESIDUAL_ALPHA: f64 = 1.0 / 16.0;

impl Default for Ar2Predictor {
    fn default() -> Self {
        Self {
            history: VecDeque::with_capacity(AR2_HISTORY),
            n: 0,
            r0: 0.0,
            r1: 0.0,
            r2: 0.0,
            alpha1: 0.0,
            alpha2: 0.0,
            error_var: None,
        }
    }
}

impl Ar2Predictor {
    fn is_ready(&self) -> bool {
        self.n as usize >= AR2_HISTORY
    }
}

impl GapPredictor for Ar2Predictor {
    fn insert(&mut self, gap_millis: f64) {
        // Score the incoming sample against the model fitted on everything
        // before it, so the residual is a genuine one-step-ahead error
        // rather than one computed with hindsight.
        if let Some(predicted) = self.predict() {
            let residual = gap_millis - predicted;
            self.error_var = Some(match self.error_var {
                Some(var) => var + RESIDUAL_ALPHA * (residual * residual - var),
                None => residual * residual,
            });
        }

        self.n += 1;
        if self.history.len() == AR2_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(gap_millis);

        if self.n > 2 {
            let len = self.history.len();
            let x0 = self.history[len - 1];
            let x1 = self.history[len - 2];
            let x2 = if len >= 3 { self.history[len - 3] } else { x1 };

            if self.n == 3 {
                self.r0 = (x0 * x0 + x1 * x1 + x2 * x2) / 3.0;
                self.r1 = (x0 * x1 + x1 * x2) / 2.0;
                self.r2 = x0 * x2;
            } else {
                let n = self.n as f64;
                self.r0 = (self.r0 * (n - 1.0) + x0 * x0) / n;
                self.r1 = (self.r1 * (n - 2.0) + x0 * x1) / (n - 1.0);
                self.r2 = (self.r2 * (n - 3.0) + x0 * x2) / (n - 2.0);
            }

            let denom2 = self.r1 * self.r1 - self.r0 * self.r0;
            let denom1 = self.r0 * self.r0 - self.r1 * self.r1;

            if denom2.abs() > f64::EPSILON {
                self.alpha2 = (self.r1 * self.r1 - self.r0 * self.r2) / denom2;
            }
            if denom1.abs() > f64::EPSILON {
                self.alpha1 = (self.r1 * self.r0 - self.r2 * self.r1) / denom1;
            }
        }
    }

    fn predict(&self) -> Option<f64> {
        if !self.is_ready() || self.history.len() < 2 {
            return None;
        }

        let len = self.history.len();
        let x_t = self.history[len - 1];
        let x_t1 = self.history[len - 2];

        Some(self.alpha1 * x_t + self.alpha2 * x_t1)
    }

    fn error_stddev(&self) -> Option<f64> {
        self.error_var.map(f64::sqrt)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
