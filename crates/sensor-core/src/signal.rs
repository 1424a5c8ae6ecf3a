//! Synthetic device signal: a reflecting Gaussian random walk.
//!
//! Each generator is seeded from the SHA-256 digest of its device name, so two
//! generators built for the same name yield the same sequence. The walk keeps
//! its running mean inside `[bound_min, bound_max]`: a step that would leave
//! the range is mirrored about the violated bound and the mean is pushed back
//! toward the centre by the size of the step.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SENSOR_MAX: f64 = 100.0;
pub const SENSOR_MIN: f64 = -100.0;
pub const N_DECIMALS: usize = 4;
pub const MU: f64 = 0.0;
pub const MAIN_SIGMA: f64 = 24.5;
pub const MINOR_SIGMA: f64 = 0.6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignalError {
    #[error("Invalid bounds: min {min} must be below max {max}")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Invalid sigma {sigma}: must be finite and non-negative")]
    InvalidSigma { sigma: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalConfig {
    pub bound_min: f64,
    pub bound_max: f64,
    /// Mean of the initial draw
    pub mu: f64,
    /// Spread of the initial mean
    pub main_sigma: f64,
    /// Spread of each step
    pub minor_sigma: f64,
    pub decimals: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            bound_min: SENSOR_MIN,
            bound_max: SENSOR_MAX,
            mu: MU,
            main_sigma: MAIN_SIGMA,
            minor_sigma: MINOR_SIGMA,
            decimals: N_DECIMALS,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), SignalError> {
        if !(self.bound_min.is_finite() && self.bound_max.is_finite())
            || self.bound_min >= self.bound_max
        {
            return Err(SignalError::InvalidBounds {
                min: self.bound_min,
                max: self.bound_max,
            });
        }
        for sigma in [self.main_sigma, self.minor_sigma] {
            if !sigma.is_finite() || sigma < 0.0 {
                return Err(SignalError::InvalidSigma { sigma });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalState {
    pub mean: f64,
    pub last_sample: f64,
    pub bound_min: f64,
    pub bound_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    /// The step left the bounds and was mirrored back
    pub reflected: bool,
}

#[derive(Debug, Clone)]
pub struct SignalGenerator {
    state: SignalState,
    config: SignalConfig,
    rng: ChaCha8Rng,
}

impl SignalGenerator {
    /// Generator with the default bounds and variances.
    pub fn new(device_name: &str) -> Self {
        Self::seeded(device_name, SignalConfig::default())
    }

    pub fn with_config(device_name: &str, config: SignalConfig) -> Result<Self, SignalError> {
        config.validate()?;
        Ok(Self::seeded(device_name, config))
    }

    fn seeded(device_name: &str, config: SignalConfig) -> Self {
        let seed: [u8; 32] = Sha256::digest(device_name.as_bytes()).into();
        let mut rng = ChaCha8Rng::from_seed(seed);
        let z: f64 = rng.sample(StandardNormal);
        let mean = (config.mu + config.main_sigma * z).clamp(config.bound_min, config.bound_max);
        Self {
            state: SignalState {
                mean,
                last_sample: mean,
                bound_min: config.bound_min,
                bound_max: config.bound_max,
            },
            config,
            rng,
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    /// Advance the walk by one step.
    pub fn next_sample(&mut self) -> Sample {
        let z: f64 = self.rng.sample(StandardNormal);
        let delta = self.config.minor_sigma * z;
        let candidate = self.state.mean + delta;
        let SignalState {
            bound_min,
            bound_max,
            ..
        } = self.state;

        let sample = if candidate > bound_max {
            self.state.mean = (self.state.mean - delta.abs()).max(bound_min);
            Sample {
                value: 2.0 * bound_max - candidate,
                reflected: true,
            }
        } else if candidate < bound_min {
            self.state.mean = (self.state.mean + delta.abs()).min(bound_max);
            Sample {
                value: 2.0 * bound_min - candidate,
                reflected: true,
            }
        } else {
            self.state.mean = candidate;
            Sample {
                value: candidate,
                reflected: false,
            }
        };

        self.state.last_sample = sample.value;
        sample
    }

    /// Advance the walk and format the reported value.
    pub fn sample(&mut self) -> String {
        let sample = self.next_sample();
        self.format(sample.value)
    }

    pub fn format(&self, value: f64) -> String {
        format!("{:.*}", self.config.decimals, value)
    }
}
