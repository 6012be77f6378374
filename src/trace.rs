//! The structured ERP trace.
//!
//! A trace records every random choice one execution of a generative
//! procedure made, keyed by structural address, together with the run's
//! accumulated log-probabilities. Re-running the trace replays the
//! procedure while reusing prior choices wherever the address (and ERP
//! kind) still match; choices on abandoned control-flow paths fall out as
//! stale, freshly reached callsites sample anew, and the two sums
//! (`new_log_prob` / `old_log_prob`) feed the lightweight-MH acceptance
//! ratio.

use std::collections::BTreeMap;
use std::mem;
use std::time::{Duration, Instant};

use log::debug;
use rand::Rng;

use crate::address::Address;
use crate::context::Context;
use crate::error::Error;
use crate::record::Record;

pub struct Trace<'a, P, A, T> {
    program: &'a P,
    args: &'a A,
    records: BTreeMap<Address, Record>,
    exec_order: Vec<Address>,
    log_prior: f64,
    log_likelihood: f64,
    new_log_prob: f64,
    old_log_prob: f64,
    return_value: Option<T>,
    prop_var_index: Option<usize>,
    replay_time: Duration,
}

impl<'a, P, A, T> Clone for Trace<'a, P, A, T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Trace {
            program: self.program,
            args: self.args,
            records: self.records.clone(),
            exec_order: self.exec_order.clone(),
            log_prior: self.log_prior,
            log_likelihood: self.log_likelihood,
            new_log_prob: self.new_log_prob,
            old_log_prob: self.old_log_prob,
            return_value: self.return_value.clone(),
            prop_var_index: self.prop_var_index,
            replay_time: self.replay_time,
        }
    }
}

impl<'a, P, A, T> Trace<'a, P, A, T>
where
    P: Fn(&mut Context, &A) -> Result<T, Error>,
    T: Clone,
{
    /// Store the procedure and its arguments. The trace holds no records
    /// until the first [`run`](Trace::run) or
    /// [`rejection_sample`](Trace::rejection_sample).
    pub fn new(program: &'a P, args: &'a A) -> Self {
        Trace {
            program,
            args,
            records: BTreeMap::new(),
            exec_order: Vec::new(),
            log_prior: 0.0,
            log_likelihood: 0.0,
            new_log_prob: 0.0,
            old_log_prob: 0.0,
            return_value: None,
            prop_var_index: None,
            replay_time: Duration::default(),
        }
    }

    /// Execute the procedure once, reusing this trace's prior choices.
    ///
    /// On success every accumulator and the return value describe the
    /// completed run. `ImpossibleTrace` leaves the trace in a torn state
    /// that the caller is expected to retry or discard; other errors are
    /// fatal.
    pub fn run<R: Rng>(&mut self, rng: &mut R) -> Result<(), Error> {
        let started = Instant::now();
        let prev = mem::take(&mut self.records);
        let mut ctx = Context::new(rng, prev, self.prop_var_index);
        let outcome = (self.program)(&mut ctx, self.args);

        self.records = mem::take(&mut ctx.records);
        self.exec_order = mem::take(&mut ctx.exec_order);
        self.log_prior = ctx.log_prior;
        self.log_likelihood = ctx.log_likelihood;
        self.new_log_prob = ctx.new_log_prob;
        self.old_log_prob = ctx.old_log_prob;
        let stack_empty = ctx.stack.is_empty();
        let stale = mem::take(&mut ctx.prev);
        drop(ctx);
        self.replay_time += started.elapsed();

        let value = outcome?;

        if !stack_empty {
            return Err(Error::invariant(
                "address stack not empty at end of run",
            ));
        }
        // Whatever the run did not revisit no longer exists; its mass is
        // what the reverse move would have to recreate.
        for (_, record) in stale {
            self.old_log_prob += record.logp;
        }
        if self.log_prior.is_nan()
            || self.log_likelihood.is_nan()
            || self.new_log_prob.is_nan()
            || self.old_log_prob.is_nan()
        {
            return Err(Error::invariant("NaN in log-probability accumulators"));
        }
        self.return_value = Some(value);
        Ok(())
    }

    /// Discard and re-draw this trace until it has nonzero posterior
    /// probability. Loops forever on a procedure that never does.
    pub fn rejection_sample<R: Rng>(&mut self, rng: &mut R) -> Result<(), Error> {
        let mut attempts = 0usize;
        loop {
            self.records.clear();
            self.exec_order.clear();
            self.return_value = None;
            attempts += 1;
            match self.run(rng) {
                Ok(()) if self.log_posterior() > f64::NEG_INFINITY => {
                    debug!("rejection sampling succeeded after {} attempts", attempts);
                    return Ok(());
                }
                Ok(()) | Err(Error::ImpossibleTrace) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Records of the last completed run, in execution order.
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.exec_order.iter().map(move |addr| &self.records[addr])
    }

    /// Number of records in the last completed run.
    pub fn len(&self) -> usize {
        self.exec_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exec_order.is_empty()
    }

    /// Record at position `k` of the execution order.
    pub fn record_at(&self, k: usize) -> &Record {
        &self.records[&self.exec_order[k]]
    }

    pub(crate) fn record_at_mut(&mut self, k: usize) -> &mut Record {
        let address = &self.exec_order[k];
        self.records
            .get_mut(address)
            .expect("execution order addresses resolve to records")
    }

    pub(crate) fn set_proposal_gate(&mut self, gate: Option<usize>) {
        self.prop_var_index = gate;
    }

    pub fn log_prior(&self) -> f64 {
        self.log_prior
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn log_posterior(&self) -> f64 {
        self.log_prior + self.log_likelihood
    }

    /// Log-mass of the records freshly sampled by the last run.
    pub fn new_log_prob(&self) -> f64 {
        self.new_log_prob
    }

    /// Log-mass of the records the last run abandoned.
    pub fn old_log_prob(&self) -> f64 {
        self.old_log_prob
    }

    pub fn return_value(&self) -> Option<&T> {
        self.return_value.as_ref()
    }

    /// Total wall time spent replaying this trace (and the traces it was
    /// cloned from).
    pub fn replay_time(&self) -> Duration {
        self.replay_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_flips(ctx: &mut Context, _args: &()) -> Result<(bool, bool), Error> {
        let a = ctx.site(0, |c| c.flip(0.25))?;
        let b = ctx.site(1, |c| c.flip(0.75))?;
        Ok((a, b))
    }

    fn branching(ctx: &mut Context, _args: &()) -> Result<f64, Error> {
        let heads = ctx.site(0, |c| c.flip(0.5))?;
        if heads {
            ctx.site(1, |c| c.gaussian(5.0, 1.0))
        } else {
            ctx.site(2, |c| c.gaussian(-5.0, 1.0))
        }
    }

    #[test]
    fn run_accumulates_prior_and_posterior_identity() {
        let mut rng = StdRng::seed_from_u64(42);
        let args = ();
        let mut trace = Trace::new(&two_flips, &args);
        trace.run(&mut rng).unwrap();

        assert_eq!(trace.len(), 2);
        let summed: f64 = trace.records().map(|r| r.logp()).sum();
        assert!((trace.log_prior() - summed).abs() < 1e-12);
        assert_eq!(trace.log_likelihood(), 0.0);
        assert!(
            (trace.log_posterior() - (trace.log_prior() + trace.log_likelihood())).abs() < 1e-12
        );
        // Everything was fresh on the first run.
        assert!((trace.new_log_prob() - trace.log_prior()).abs() < 1e-12);
        assert_eq!(trace.old_log_prob(), 0.0);
        assert!(trace.return_value().is_some());
    }

    #[test]
    fn indices_follow_execution_order() {
        let mut rng = StdRng::seed_from_u64(42);
        let args = ();
        let mut trace = Trace::new(&two_flips, &args);
        trace.run(&mut rng).unwrap();

        for (k, record) in trace.records().enumerate() {
            assert_eq!(record.index(), k);
            assert_eq!(record.depth(), 1);
        }
    }

    #[test]
    fn rerun_reuses_every_choice() {
        let mut rng = StdRng::seed_from_u64(7);
        let args = ();
        let mut trace = Trace::new(&two_flips, &args);
        trace.run(&mut rng).unwrap();

        let values: Vec<Value> = trace.records().map(|r| r.value().clone()).collect();
        let log_prior = trace.log_prior();

        trace.run(&mut rng).unwrap();
        let replayed: Vec<Value> = trace.records().map(|r| r.value().clone()).collect();

        assert_eq!(values, replayed);
        assert!((trace.log_prior() - log_prior).abs() < 1e-12);
        assert_eq!(trace.new_log_prob(), 0.0);
        assert_eq!(trace.old_log_prob(), 0.0);
    }

    #[test]
    fn clone_then_rerun_matches_original() {
        let mut rng = StdRng::seed_from_u64(13);
        let args = ();
        let mut trace = Trace::new(&branching, &args);
        trace.run(&mut rng).unwrap();

        let mut copy = trace.clone();
        copy.run(&mut rng).unwrap();

        assert_eq!(copy.len(), trace.len());
        assert!((copy.log_prior() - trace.log_prior()).abs() < 1e-12);
        assert!((copy.log_likelihood() - trace.log_likelihood()).abs() < 1e-12);
        for (a, b) in trace.records().zip(copy.records()) {
            assert_eq!(a.address(), b.address());
            assert_eq!(a.value(), b.value());
        }
    }

    #[test]
    fn clones_do_not_alias() {
        let mut rng = StdRng::seed_from_u64(3);
        let args = ();
        let mut trace = Trace::new(&two_flips, &args);
        trace.run(&mut rng).unwrap();

        let original = trace.record_at(0).value().clone();
        let mut copy = trace.clone();
        let flipped = Value::Bool(!original.as_bool().unwrap());
        copy.record_at_mut(0).value = flipped;

        assert_eq!(trace.record_at(0).value(), &original);
    }

    #[test]
    fn fresh_runs_with_the_same_seed_are_deterministic() {
        let args = ();
        let mut first = Trace::new(&branching, &args);
        let mut second = Trace::new(&branching, &args);

        first.run(&mut StdRng::seed_from_u64(99)).unwrap();
        second.run(&mut StdRng::seed_from_u64(99)).unwrap();

        assert_eq!(first.return_value(), second.return_value());
        assert!((first.log_prior() - second.log_prior()).abs() < 1e-15);
    }

    #[test]
    fn duplicate_address_is_an_invariant_violation() {
        fn collide(ctx: &mut Context, _args: &()) -> Result<(), Error> {
            ctx.site(0, |c| c.flip(0.5))?;
            ctx.site(0, |c| c.flip(0.5))?;
            Ok(())
        }

        let mut rng = StdRng::seed_from_u64(0);
        let args = ();
        let mut trace = Trace::new(&collide, &args);
        assert!(matches!(
            trace.run(&mut rng),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn unbalanced_stack_is_an_invariant_violation() {
        fn dangling(ctx: &mut Context, _args: &()) -> Result<bool, Error> {
            ctx.push_address(4);
            ctx.flip(0.5)
        }

        let mut rng = StdRng::seed_from_u64(0);
        let args = ();
        let mut trace = Trace::new(&dangling, &args);
        assert!(matches!(
            trace.run(&mut rng),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn rejection_sampling_retries_until_feasible() {
        fn gated(ctx: &mut Context, _args: &()) -> Result<f64, Error> {
            let x = ctx.uniform(0.0, 10.0)?;
            if x <= 7.0 {
                return Err(ctx.zero_probability());
            }
            Ok(x)
        }

        let mut rng = StdRng::seed_from_u64(21);
        let args = ();
        let mut trace = Trace::new(&gated, &args);
        trace.rejection_sample(&mut rng).unwrap();

        let x = trace.return_value().copied().unwrap();
        assert!(x > 7.0 && x <= 10.0);
        assert!(trace.log_posterior() > f64::NEG_INFINITY);
    }

    #[test]
    fn proposal_replay_swaps_fresh_and_stale_mass() {
        let mut rng = StdRng::seed_from_u64(5);
        let args = ();
        let mut trace = Trace::new(&branching, &args);
        trace.run(&mut rng).unwrap();

        let heads = trace.record_at(0).value().as_bool().unwrap();
        let branch_logp = trace.record_at(1).logp();

        // Force the control-flow flip by hand, the way a proposal does.
        let mut proposed = trace.clone();
        {
            let record = proposed.record_at_mut(0);
            record.value = Value::Bool(!heads);
            let logp = record.erp().logprob(&record.value);
            record.logp = logp;
        }
        proposed.set_proposal_gate(Some(0));
        proposed.run(&mut rng).unwrap();
        proposed.set_proposal_gate(None);

        // The prefix (the flip itself) kept its proposed value.
        assert_eq!(
            proposed.record_at(0).value().as_bool().unwrap(),
            !heads
        );
        // One gaussian was abandoned, one freshly sampled.
        assert_eq!(proposed.len(), 2);
        assert!((proposed.old_log_prob() - branch_logp).abs() < 1e-12);
        assert!((proposed.new_log_prob() - proposed.record_at(1).logp()).abs() < 1e-12);
        assert_ne!(
            proposed.record_at(1).address(),
            trace.record_at(1).address()
        );
    }

    #[test]
    fn params_refresh_on_reuse_while_values_persist() {
        fn coupled(ctx: &mut Context, _args: &()) -> Result<f64, Error> {
            let spread = ctx.site(0, |c| c.uniform(1.0, 2.0))?;
            ctx.site(1, |c| c.gaussian(0.0, spread))
        }

        let mut rng = StdRng::seed_from_u64(17);
        let args = ();
        let mut trace = Trace::new(&coupled, &args);
        trace.run(&mut rng).unwrap();

        let gaussian_value = trace.record_at(1).value().clone();

        // Change the upstream choice; the downstream record must keep its
        // value but be rescored under the new spread.
        let mut proposed = trace.clone();
        {
            let record = proposed.record_at_mut(0);
            record.value = Value::Real(1.5);
            let logp = record.erp().logprob(&record.value);
            record.logp = logp;
        }
        proposed.set_proposal_gate(Some(0));
        proposed.run(&mut rng).unwrap();

        assert_eq!(proposed.record_at(1).value(), &gaussian_value);
        let expected = proposed
            .record_at(1)
            .erp()
            .logprob(&gaussian_value);
        assert!((proposed.record_at(1).logp() - expected).abs() < 1e-12);
        assert_eq!(proposed.new_log_prob(), 0.0);
        assert_eq!(proposed.old_log_prob(), 0.0);
    }
}
