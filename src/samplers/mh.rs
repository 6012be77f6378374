//! Single-chain Metropolis-Hastings driver.

use std::time::{Duration, Instant};

use log::{debug, info};
use rand::Rng;

use crate::chain::Chain;
use crate::context::Context;
use crate::error::Error;
use crate::trace::Trace;

/// Configuration and entry point for one MH run.
///
/// # Example
/// ```rust
/// use lightmh::{Context, Error, MhSampler};
/// use rand::rngs::StdRng;
/// use rand::SeedableRng;
///
/// fn coin(ctx: &mut Context, _args: &()) -> Result<bool, Error> {
///     ctx.flip(0.3)
/// }
///
/// let mut rng = StdRng::seed_from_u64(0xFEED);
/// let args = ();
/// let mut heads = 0usize;
/// let summary = MhSampler::new(&coin, &args)
///     .samples(500)
///     .run(&mut rng, |trace| {
///         if *trace.return_value().unwrap() {
///             heads += 1;
///         }
///     })
///     .unwrap();
///
/// assert!(summary.acceptance_ratio() > 0.0);
/// assert!(heads > 0);
/// ```
pub struct MhSampler<'a, P, A> {
    program: &'a P,
    args: &'a A,
    n_samples: usize,
    lag: usize,
    time_budget: Option<Duration>,
    verbose: bool,
    temperature: f64,
    depth_biased: bool,
}

impl<'a, P, A> Clone for MhSampler<'a, P, A> {
    fn clone(&self) -> Self {
        Self {
            program: self.program,
            args: self.args,
            n_samples: self.n_samples,
            lag: self.lag,
            time_budget: self.time_budget,
            verbose: self.verbose,
            temperature: self.temperature,
            depth_biased: self.depth_biased,
        }
    }
}

impl<'a, P, A> MhSampler<'a, P, A> {
    pub fn new(program: &'a P, args: &'a A) -> Self {
        Self {
            program,
            args,
            n_samples: 1000,
            lag: 1,
            time_budget: None,
            verbose: false,
            temperature: 1.0,
            depth_biased: false,
        }
    }

    /// Number of samples to emit.
    pub fn samples(&self, n_samples: usize) -> Self {
        Self {
            n_samples,
            ..(*self).clone()
        }
    }

    /// Iterations per emitted sample; total iterations are `lag * samples`.
    pub fn lag(&self, lag: usize) -> Self {
        Self {
            lag,
            ..(*self).clone()
        }
    }

    /// Wall-clock cap; supersedes the iteration count when it expires.
    pub fn time_budget(&self, budget: Duration) -> Self {
        Self {
            time_budget: Some(budget),
            ..(*self).clone()
        }
    }

    /// Log completion statistics.
    pub fn verbose(&self) -> Self {
        Self {
            verbose: true,
            ..(*self).clone()
        }
    }

    /// Likelihood temperature (1 samples the true posterior).
    pub fn temperature(&self, temperature: f64) -> Self {
        Self {
            temperature,
            ..(*self).clone()
        }
    }

    /// Weight proposal-site selection by `exp(-depth)`.
    pub fn depth_biased(&self) -> Self {
        Self {
            depth_biased: true,
            ..(*self).clone()
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.lag == 0 {
            return Err(Error::config("lag must be at least 1"));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(Error::config(format!(
                "temperature {} must be finite and positive",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Run the chain, invoking `on_sample` with the current trace every
    /// `lag` iterations.
    pub fn run<T, R, F>(&self, rng: &mut R, mut on_sample: F) -> Result<MhSummary, Error>
    where
        P: Fn(&mut Context, &A) -> Result<T, Error>,
        T: Clone,
        R: Rng,
        F: FnMut(&Trace<'a, P, A, T>),
    {
        self.validate()?;
        let started = Instant::now();
        let mut chain = Chain::new(self.program, self.args, self.temperature, rng)?;

        let iters = self.lag * self.n_samples;
        for i in 1..=iters {
            chain.step(rng, self.depth_biased)?;
            if i % self.lag == 0 {
                on_sample(chain.trace());
            }
            if let Some(budget) = self.time_budget {
                if started.elapsed() >= budget {
                    debug!("time budget expired after {} of {} iterations", i, iters);
                    break;
                }
            }
        }

        let summary = MhSummary {
            steps: chain.steps(),
            accepted: chain.accepted(),
            elapsed: started.elapsed(),
            replay: chain.replay_time(),
        };
        if self.verbose {
            info!(
                "MH done: {} steps, acceptance ratio {:.4}, elapsed {:.2?}, {:.1}% in replay",
                summary.steps,
                summary.acceptance_ratio(),
                summary.elapsed,
                100.0 * summary.replay_fraction()
            );
        }
        Ok(summary)
    }
}

/// Acceptance and timing statistics for one chain.
#[derive(Clone, Debug)]
pub struct MhSummary {
    pub steps: usize,
    pub accepted: usize,
    pub elapsed: Duration,
    /// Wall time spent inside trace replays.
    pub replay: Duration,
}

impl MhSummary {
    pub fn acceptance_ratio(&self) -> f64 {
        self.accepted as f64 / self.steps.max(1) as f64
    }

    /// Fraction of the elapsed time spent replaying traces.
    pub fn replay_fraction(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.replay.as_secs_f64() / elapsed
    }
}
