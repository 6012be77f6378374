//! Rejection and forward sampling.
//!
//! Thin wrappers over the trace: rejection sampling retries whole runs
//! until the posterior is feasible (the same loop MH chains initialize
//! with); forward sampling runs the procedure once against the prior.

use rand::Rng;

use crate::context::Context;
use crate::error::Error;
use crate::trace::Trace;

/// Draw `n` independent return values, rejecting any execution with zero
/// posterior probability.
pub fn rejection_sample<P, A, T, R>(
    program: &P,
    args: &A,
    n: usize,
    rng: &mut R,
) -> Result<Vec<T>, Error>
where
    P: Fn(&mut Context, &A) -> Result<T, Error>,
    T: Clone,
    R: Rng,
{
    let mut samples = Vec::with_capacity(n);
    let mut trace = Trace::new(program, args);
    for _ in 0..n {
        trace.rejection_sample(rng)?;
        let value = trace
            .return_value()
            .cloned()
            .expect("a feasible run stores its return value");
        samples.push(value);
    }
    Ok(samples)
}

/// Run the procedure once from the prior, ignoring likelihood weighting.
/// A procedure that aborts with zero probability surfaces that error.
pub fn forward_sample<P, A, T, R>(program: &P, args: &A, rng: &mut R) -> Result<T, Error>
where
    P: Fn(&mut Context, &A) -> Result<T, Error>,
    T: Clone,
    R: Rng,
{
    let mut trace = Trace::new(program, args);
    trace.run(rng)?;
    Ok(trace
        .return_value()
        .cloned()
        .expect("a completed run stores its return value"))
}
