//! A single Markov chain over traces.

use std::time::Duration;

use itertools::Itertools;
use log::debug;
use rand::Rng;

use crate::context::Context;
use crate::error::Error;
use crate::record::Record;
use crate::samplers::helpers::{metropolis_select, MHStatus};
use crate::trace::Trace;

/// One chain: a trace plus the temperature its likelihood is flattened
/// by. Temperature scales the likelihood only; the prior stays intact.
pub struct Chain<'a, P, A, T> {
    trace: Trace<'a, P, A, T>,
    temperature: f64,
    steps: usize,
    accepted: usize,
    replay: Duration,
}

impl<'a, P, A, T> Chain<'a, P, A, T>
where
    P: Fn(&mut Context, &A) -> Result<T, Error>,
    T: Clone,
{
    /// Build a chain whose initial trace is drawn by rejection sampling.
    pub fn new<R: Rng>(
        program: &'a P,
        args: &'a A,
        temperature: f64,
        rng: &mut R,
    ) -> Result<Self, Error> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::config(format!(
                "chain temperature {} must be finite and positive",
                temperature
            )));
        }
        let mut trace = Trace::new(program, args);
        trace.rejection_sample(rng)?;
        Ok(Chain::from_trace(trace, temperature))
    }

    /// Adopt an already-initialized trace (used by parallel tempering to
    /// start every rung from one rejection-sampled state).
    pub(crate) fn from_trace(trace: Trace<'a, P, A, T>, temperature: f64) -> Self {
        let replay = trace.replay_time();
        Chain {
            trace,
            temperature,
            steps: 0,
            accepted: 0,
            replay,
        }
    }

    pub fn trace(&self) -> &Trace<'a, P, A, T> {
        &self.trace
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub(crate) fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn acceptance_ratio(&self) -> f64 {
        self.accepted as f64 / self.steps.max(1) as f64
    }

    /// Wall time this chain has spent replaying traces, rejected
    /// proposals included.
    pub fn replay_time(&self) -> Duration {
        self.replay
    }

    fn tempered(&self, trace: &Trace<'a, P, A, T>) -> f64 {
        trace.log_prior() + trace.log_likelihood() / self.temperature
    }

    /// One Metropolis-Hastings step: pick a record, perturb it with its
    /// kernel, replay, and accept or reject on the lightweight-MH ratio.
    /// Returns whether the proposal was accepted.
    pub fn step<R: Rng>(&mut self, rng: &mut R, depth_biased: bool) -> Result<bool, Error> {
        self.steps += 1;
        if self.trace.is_empty() {
            // Nothing random to perturb; the state trivially persists.
            self.accepted += 1;
            return Ok(true);
        }

        let mut proposed = self.trace.clone();
        let (k, forward_selection) = select_variable(&proposed, depth_biased, rng);

        let proposal = {
            let record = proposed.record_at(k);
            record.erp().propose(record.value(), rng)
        };
        {
            let record = proposed.record_at_mut(k);
            record.value = proposal.value.clone();
            let rescored = record.erp.logprob(&record.value);
            record.logp = rescored;
        }

        proposed.set_proposal_gate(Some(k));
        let replay_before = proposed.replay_time();
        let replayed = proposed.run(rng);
        proposed.set_proposal_gate(None);
        self.replay += proposed.replay_time() - replay_before;

        match replayed {
            Ok(()) => {}
            Err(Error::ImpossibleTrace) => {
                debug!("proposal at index {} hit zero probability; rejected", k);
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        let forward = forward_selection + proposal.forward + proposed.new_log_prob();
        let reverse = selection_logprob(&proposed, depth_biased, k)
            + proposal.reverse
            + proposed.old_log_prob();
        let log_alpha = self.tempered(&proposed) - self.tempered(&self.trace) + reverse - forward;
        if log_alpha.is_nan() {
            return Err(Error::invariant("NaN in MH acceptance ratio"));
        }

        match metropolis_select(rng, log_alpha) {
            MHStatus::Accepted(_) => {
                self.trace = proposed;
                self.accepted += 1;
                Ok(true)
            }
            MHStatus::Rejected(_) => Ok(false),
        }
    }
}

/// Choose the record to perturb; returns its execution-order position and
/// the log-probability of having chosen it.
fn select_variable<'a, P, A, T, R>(
    trace: &Trace<'a, P, A, T>,
    depth_biased: bool,
    rng: &mut R,
) -> (usize, f64)
where
    P: Fn(&mut Context, &A) -> Result<T, Error>,
    T: Clone,
    R: Rng,
{
    let n = trace.len();
    if !depth_biased {
        return (rng.gen_range(0..n), -(n as f64).ln());
    }
    let weights = depth_weights(trace.records());
    let total: f64 = weights.iter().sum();
    let k = crate::utils::draw_categorical(&weights, rng);
    (k, (weights[k] / total).ln())
}

/// Log-probability that the selection scheme picks position `k` on the
/// given trace (the reverse leg of the selection).
fn selection_logprob<'a, P, A, T>(
    trace: &Trace<'a, P, A, T>,
    depth_biased: bool,
    k: usize,
) -> f64
where
    P: Fn(&mut Context, &A) -> Result<T, Error>,
    T: Clone,
{
    let n = trace.len();
    if !depth_biased {
        return -(n as f64).ln();
    }
    let weights = depth_weights(trace.records());
    let total: f64 = weights.iter().sum();
    (weights[k] / total).ln()
}

/// Selection weight `exp(-depth)` per record: shallow choices carry more
/// weight, since perturbing them reshapes more downstream structure per
/// proposal.
fn depth_weights<'t>(records: impl Iterator<Item = &'t Record>) -> Vec<f64> {
    records
        .map(|record| (-(record.depth() as f64)).exp())
        .collect_vec()
}
