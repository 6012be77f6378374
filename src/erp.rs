//! Elementary random procedures.
//!
//! Each variant carries its own parameter shape and dispatches sampling,
//! log-density and the single-variable proposal kernel. All probability
//! arithmetic is in log space; impossible events are an explicit `-inf`
//! rather than an error here, so the trace can decide what a `-inf`
//! means for the run in progress.

use rand::Rng;
use rv::dist::Gaussian;
use rv::traits::Rv;

use crate::error::Error;
use crate::record::Value;
use crate::utils::draw_categorical;

/// A primitive distribution together with its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum Erp {
    Flip { p: f64 },
    Uniform { lo: f64, hi: f64 },
    Multinomial { weights: Vec<f64> },
    Gaussian { mu: f64, sigma: f64 },
}

/// Parameter-free tag of an [`Erp`], used to detect kind changes when a
/// replay revisits an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErpKind {
    Flip,
    Uniform,
    Multinomial,
    Gaussian,
}

/// Outcome of a proposal kernel: the candidate value plus the forward and
/// reverse transition log-probabilities.
#[derive(Clone, Debug)]
pub struct Proposal {
    pub value: Value,
    pub forward: f64,
    pub reverse: f64,
}

impl Erp {
    pub fn kind(&self) -> ErpKind {
        match self {
            Erp::Flip { .. } => ErpKind::Flip,
            Erp::Uniform { .. } => ErpKind::Uniform,
            Erp::Multinomial { .. } => ErpKind::Multinomial,
            Erp::Gaussian { .. } => ErpKind::Gaussian,
        }
    }

    /// Validate parameters before any sampling happens.
    ///
    /// Params may be computed from earlier random choices, so this runs on
    /// every ERP call, not once per callsite.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Erp::Flip { p } => {
                if !(*p >= 0.0 && *p <= 1.0) {
                    return Err(Error::config(format!("flip weight {} outside [0, 1]", p)));
                }
            }
            Erp::Uniform { lo, hi } => {
                if !lo.is_finite() || !hi.is_finite() || lo > hi {
                    return Err(Error::config(format!(
                        "uniform bounds [{}, {}] are not a valid interval",
                        lo, hi
                    )));
                }
            }
            Erp::Multinomial { weights } => {
                if weights.is_empty() {
                    return Err(Error::config("multinomial requires at least one weight"));
                }
                if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                    return Err(Error::config(
                        "multinomial weights must be finite and non-negative",
                    ));
                }
                if weights.iter().sum::<f64>() <= 0.0 {
                    return Err(Error::config("multinomial weights sum to zero"));
                }
            }
            Erp::Gaussian { mu, sigma } => {
                if !mu.is_finite() || !sigma.is_finite() || *sigma <= 0.0 {
                    return Err(Error::config(format!(
                        "gaussian({}, {}) requires a finite mean and a positive stdev",
                        mu, sigma
                    )));
                }
            }
        }
        Ok(())
    }

    /// Draw a fresh value. Params are assumed validated.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Value {
        match self {
            Erp::Flip { p } => Value::Bool(rng.gen::<f64>() < *p),
            Erp::Uniform { lo, hi } => {
                if hi > lo {
                    Value::Real(rng.gen_range(*lo..*hi))
                } else {
                    // Degenerate interval: all mass on the single point.
                    Value::Real(*lo)
                }
            }
            Erp::Multinomial { weights } => Value::Nat(draw_categorical(weights, rng)),
            Erp::Gaussian { mu, sigma } => {
                let g = Gaussian::new(*mu, *sigma).expect("params validated before sampling");
                Value::Real(g.draw(rng))
            }
        }
    }

    /// `log P(value | params)`. A value of the wrong shape scores `-inf`.
    pub fn logprob(&self, value: &Value) -> f64 {
        match (self, value) {
            (Erp::Flip { p }, Value::Bool(b)) => {
                if *b {
                    p.ln()
                } else {
                    (1.0 - p).ln()
                }
            }
            (Erp::Uniform { lo, hi }, Value::Real(x)) => {
                if lo == hi {
                    if x == lo {
                        f64::INFINITY
                    } else {
                        f64::NEG_INFINITY
                    }
                } else if *x >= *lo && *x <= *hi {
                    -(hi - lo).ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
            (Erp::Multinomial { weights }, Value::Nat(i)) => {
                let total: f64 = weights.iter().sum();
                match weights.get(*i) {
                    Some(w) if *w > 0.0 => (w / total).ln(),
                    _ => f64::NEG_INFINITY,
                }
            }
            (Erp::Gaussian { mu, sigma }, Value::Real(x)) => {
                let g = Gaussian::new(*mu, *sigma).expect("params validated before scoring");
                g.ln_f(x)
            }
            _ => f64::NEG_INFINITY,
        }
    }

    /// Single-variable proposal kernel.
    ///
    /// `flip` negates the bit (symmetric); `uniform` and `gaussian`
    /// resample the prior; `multinomial` resamples conditioned on the
    /// value changing, degenerating to the identity when no other
    /// category has positive weight.
    pub fn propose<R: Rng>(&self, current: &Value, rng: &mut R) -> Proposal {
        match self {
            Erp::Flip { .. } => {
                let b = current.as_bool().unwrap_or(false);
                Proposal {
                    value: Value::Bool(!b),
                    forward: 0.0,
                    reverse: 0.0,
                }
            }
            Erp::Uniform { .. } | Erp::Gaussian { .. } => {
                let value = self.sample(rng);
                Proposal {
                    forward: self.logprob(&value),
                    reverse: self.logprob(current),
                    value,
                }
            }
            Erp::Multinomial { weights } => {
                let total: f64 = weights.iter().sum();
                let old = current.as_nat().unwrap_or(weights.len());
                let w_old = weights.get(old).copied().unwrap_or(0.0);
                let rest = total - w_old;
                if rest <= 0.0 {
                    // No alternative category to move to.
                    return Proposal {
                        value: current.clone(),
                        forward: 0.0,
                        reverse: 0.0,
                    };
                }
                let mut restricted = weights.clone();
                if old < restricted.len() {
                    restricted[old] = 0.0;
                }
                let new = draw_categorical(&restricted, rng);
                let reverse_total = total - weights[new];
                Proposal {
                    value: Value::Nat(new),
                    forward: (weights[new] / rest).ln(),
                    reverse: if w_old > 0.0 && reverse_total > 0.0 {
                        (w_old / reverse_total).ln()
                    } else {
                        f64::NEG_INFINITY
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn validation_rejects_bad_params() {
        assert!(Erp::Flip { p: 1.5 }.validate().is_err());
        assert!(Erp::Flip { p: f64::NAN }.validate().is_err());
        assert!(Erp::Uniform { lo: 2.0, hi: 1.0 }.validate().is_err());
        assert!(Erp::Multinomial { weights: vec![] }.validate().is_err());
        assert!(Erp::Multinomial {
            weights: vec![0.0, 0.0]
        }
        .validate()
        .is_err());
        assert!(Erp::Multinomial {
            weights: vec![1.0, -0.5]
        }
        .validate()
        .is_err());
        assert!(Erp::Gaussian { mu: 0.0, sigma: 0.0 }.validate().is_err());
    }

    #[test]
    fn validation_accepts_degenerate_but_legal_params() {
        assert!(Erp::Flip { p: 0.0 }.validate().is_ok());
        assert!(Erp::Flip { p: 1.0 }.validate().is_ok());
        assert!(Erp::Uniform { lo: 2.0, hi: 2.0 }.validate().is_ok());
        assert!(Erp::Multinomial {
            weights: vec![0.0, 3.0]
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn flip_density() {
        let erp = Erp::Flip { p: 0.3 };
        assert!((erp.logprob(&Value::Bool(true)) - 0.3f64.ln()).abs() < 1e-12);
        assert!((erp.logprob(&Value::Bool(false)) - 0.7f64.ln()).abs() < 1e-12);

        let sure = Erp::Flip { p: 1.0 };
        assert_eq!(sure.logprob(&Value::Bool(false)), f64::NEG_INFINITY);
        assert_eq!(sure.logprob(&Value::Bool(true)), 0.0);
    }

    #[test]
    fn deterministic_flips_sample_their_only_outcome() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            assert_eq!(Erp::Flip { p: 0.0 }.sample(&mut rng), Value::Bool(false));
            assert_eq!(Erp::Flip { p: 1.0 }.sample(&mut rng), Value::Bool(true));
        }
    }

    #[test]
    fn uniform_density_including_degenerate_interval() {
        let erp = Erp::Uniform { lo: 1.0, hi: 3.0 };
        assert!((erp.logprob(&Value::Real(2.0)) + 2.0f64.ln()).abs() < 1e-12);
        assert_eq!(erp.logprob(&Value::Real(4.0)), f64::NEG_INFINITY);

        let point = Erp::Uniform { lo: 2.0, hi: 2.0 };
        assert_eq!(point.logprob(&Value::Real(2.0)), f64::INFINITY);
        assert_eq!(point.logprob(&Value::Real(2.1)), f64::NEG_INFINITY);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(point.sample(&mut rng), Value::Real(2.0));
    }

    #[test]
    fn multinomial_density_normalizes_unnormalized_weights() {
        let erp = Erp::Multinomial {
            weights: vec![2.0, 0.0, 6.0],
        };
        assert!((erp.logprob(&Value::Nat(0)) - 0.25f64.ln()).abs() < 1e-12);
        assert_eq!(erp.logprob(&Value::Nat(1)), f64::NEG_INFINITY);
        assert!((erp.logprob(&Value::Nat(2)) - 0.75f64.ln()).abs() < 1e-12);
        assert_eq!(erp.logprob(&Value::Nat(9)), f64::NEG_INFINITY);
    }

    #[test]
    fn gaussian_density_matches_closed_form() {
        let erp = Erp::Gaussian { mu: 1.0, sigma: 2.0 };
        let x = 0.25;
        let manual = -0.5 * ((x - 1.0f64) / 2.0).powi(2)
            - 2.0f64.ln()
            - 0.5 * (2.0 * std::f64::consts::PI).ln();
        assert!((erp.logprob(&Value::Real(x)) - manual).abs() < 1e-10);
    }

    #[test]
    fn flip_proposal_is_symmetric_negation() {
        let mut rng = StdRng::seed_from_u64(1);
        let erp = Erp::Flip { p: 0.3 };
        let proposal = erp.propose(&Value::Bool(true), &mut rng);
        assert_eq!(proposal.value, Value::Bool(false));
        assert_eq!(proposal.forward, 0.0);
        assert_eq!(proposal.reverse, 0.0);
    }

    #[test]
    fn prior_resampling_kernels_score_both_directions() {
        let mut rng = StdRng::seed_from_u64(2);
        let erp = Erp::Gaussian { mu: 0.0, sigma: 1.0 };
        let current = Value::Real(0.7);
        let proposal = erp.propose(&current, &mut rng);
        assert!((proposal.forward - erp.logprob(&proposal.value)).abs() < 1e-12);
        assert!((proposal.reverse - erp.logprob(&current)).abs() < 1e-12);
    }

    #[test]
    fn multinomial_proposal_always_moves_when_it_can() {
        let mut rng = StdRng::seed_from_u64(3);
        let erp = Erp::Multinomial {
            weights: vec![1.0, 2.0, 3.0],
        };
        for _ in 0..200 {
            let proposal = erp.propose(&Value::Nat(1), &mut rng);
            assert_ne!(proposal.value, Value::Nat(1));
            assert!(proposal.forward.is_finite());
            assert!(proposal.reverse.is_finite());
        }
    }

    #[test]
    fn multinomial_proposal_degenerates_without_alternatives() {
        let mut rng = StdRng::seed_from_u64(4);
        let erp = Erp::Multinomial {
            weights: vec![0.0, 5.0],
        };
        let proposal = erp.propose(&Value::Nat(1), &mut rng);
        assert_eq!(proposal.value, Value::Nat(1));
        assert_eq!(proposal.forward, 0.0);
        assert_eq!(proposal.reverse, 0.0);
    }
}
