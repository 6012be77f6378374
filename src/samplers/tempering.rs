//! Parallel tempering: a ladder of chains at different likelihood
//! temperatures, advanced round-robin on one thread, with periodic
//! proposals to swap the temperatures of adjacent rungs.

use std::time::{Duration, Instant};

use log::{debug, info};
use rand::Rng;

use crate::chain::Chain;
use crate::context::Context;
use crate::error::Error;
use crate::samplers::helpers::{metropolis_select, MHStatus};
use crate::samplers::mh::MhSummary;
use crate::trace::Trace;

/// Configuration and entry point for a parallel-tempered MH run.
pub struct TemperedSampler<'a, P, A> {
    program: &'a P,
    args: &'a A,
    temps: Vec<f64>,
    swap_interval: usize,
    n_samples: usize,
    lag: usize,
    time_budget: Option<Duration>,
    verbose: bool,
    depth_biased: bool,
}

impl<'a, P, A> Clone for TemperedSampler<'a, P, A> {
    fn clone(&self) -> Self {
        Self {
            program: self.program,
            args: self.args,
            temps: self.temps.clone(),
            swap_interval: self.swap_interval,
            n_samples: self.n_samples,
            lag: self.lag,
            time_budget: self.time_budget,
            verbose: self.verbose,
            depth_biased: self.depth_biased,
        }
    }
}

impl<'a, P, A> TemperedSampler<'a, P, A> {
    /// The ladder ordering is the caller's; swaps only ever touch
    /// adjacent positions.
    pub fn new(program: &'a P, args: &'a A, temps: Vec<f64>) -> Self {
        Self {
            program,
            args,
            temps,
            swap_interval: 10,
            n_samples: 1000,
            lag: 1,
            time_budget: None,
            verbose: false,
            depth_biased: false,
        }
    }

    /// Number of samples each chain emits.
    pub fn samples(&self, n_samples: usize) -> Self {
        Self {
            n_samples,
            ..(*self).clone()
        }
    }

    /// Iterations per emitted sample.
    pub fn lag(&self, lag: usize) -> Self {
        Self {
            lag,
            ..(*self).clone()
        }
    }

    /// Steps every chain takes between swap proposals.
    pub fn swap_interval(&self, swap_interval: usize) -> Self {
        Self {
            swap_interval,
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

    /// Weight proposal-site selection by `exp(-depth)`.
    pub fn depth_biased(&self) -> Self {
        Self {
            depth_biased: true,
            ..(*self).clone()
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.temps.len() < 2 {
            return Err(Error::config(
                "parallel tempering needs at least two temperatures",
            ));
        }
        if self
            .temps
            .iter()
            .any(|t| !t.is_finite() || *t <= 0.0)
        {
            return Err(Error::config(
                "temperatures must be finite and positive",
            ));
        }
        if self.swap_interval == 0 {
            return Err(Error::config("swap interval must be at least 1"));
        }
        if self.lag == 0 {
            return Err(Error::config("lag must be at least 1"));
        }
        Ok(())
    }

    /// Run the ladder. `on_sample` fires for every chain at its own lag
    /// boundary and receives the chain's current temperature; callers
    /// interested only in the posterior filter on `temperature == 1`.
    pub fn run<T, R, F>(&self, rng: &mut R, mut on_sample: F) -> Result<TemperedSummary, Error>
    where
        P: Fn(&mut Context, &A) -> Result<T, Error>,
        T: Clone,
        R: Rng,
        F: FnMut(&Trace<'a, P, A, T>, f64),
    {
        self.validate()?;
        let started = Instant::now();

        // One rejection-sampled trace, duplicated across the ladder so
        // every rung starts from the same state.
        let mut first = Trace::new(self.program, self.args);
        first.rejection_sample(rng)?;
        let mut chains: Vec<Chain<'a, P, A, T>> = self
            .temps
            .iter()
            .map(|&temp| Chain::from_trace(first.clone(), temp))
            .collect();

        let iters = self.lag * self.n_samples;
        let mut completed = 0usize;
        let mut swap_attempts = 0usize;
        let mut swaps_accepted = 0usize;

        'rounds: while completed < iters {
            let burst = self.swap_interval.min(iters - completed);
            for chain in chains.iter_mut() {
                for s in 0..burst {
                    chain.step(rng, self.depth_biased)?;
                    if (completed + s + 1) % self.lag == 0 {
                        on_sample(chain.trace(), chain.temperature());
                    }
                    if let Some(budget) = self.time_budget {
                        if started.elapsed() >= budget {
                            debug!("time budget expired mid-round");
                            break 'rounds;
                        }
                    }
                }
            }
            completed += burst;

            // Propose exchanging temperatures between one adjacent pair,
            // scored on the untempered posteriors under the pre-swap
            // temperatures. Traces stay put; only temperatures move.
            swap_attempts += 1;
            let j = rng.gen_range(0..chains.len() - 1);
            let (t_a, t_b) = (chains[j].temperature(), chains[j + 1].temperature());
            let (pi_a, pi_b) = (
                chains[j].trace().log_posterior(),
                chains[j + 1].trace().log_posterior(),
            );
            let log_alpha = pi_a / t_b + pi_b / t_a - pi_a / t_a - pi_b / t_b;
            if log_alpha.is_nan() {
                return Err(Error::invariant("NaN in temperature-swap ratio"));
            }
            if let MHStatus::Accepted(_) = metropolis_select(rng, log_alpha) {
                chains[j].set_temperature(t_b);
                chains[j + 1].set_temperature(t_a);
                swaps_accepted += 1;
                debug!("swapped temperatures {} and {} at rung {}", t_a, t_b, j);
            }
        }

        let summary = TemperedSummary {
            chains: chains
                .iter()
                .map(|chain| MhSummary {
                    steps: chain.steps(),
                    accepted: chain.accepted(),
                    elapsed: started.elapsed(),
                    replay: chain.replay_time(),
                })
                .collect(),
            swap_attempts,
            swaps_accepted,
            elapsed: started.elapsed(),
        };
        if self.verbose {
            let ratios: Vec<String> = summary
                .chains
                .iter()
                .map(|c| format!("{:.3}", c.acceptance_ratio()))
                .collect();
            info!(
                "PT done: acceptance per rung [{}], {}/{} swaps accepted, elapsed {:.2?}",
                ratios.join(", "),
                summary.swaps_accepted,
                summary.swap_attempts,
                summary.elapsed
            );
        }
        Ok(summary)
    }
}

/// Statistics for a tempered run: per-chain acceptance plus the swap
/// bookkeeping.
#[derive(Clone, Debug)]
pub struct TemperedSummary {
    pub chains: Vec<MhSummary>,
    pub swap_attempts: usize,
    pub swaps_accepted: usize,
    pub elapsed: Duration,
}

impl TemperedSummary {
    pub fn swap_ratio(&self) -> f64 {
        self.swaps_accepted as f64 / self.swap_attempts.max(1) as f64
    }
}
