//! Shared Metropolis accept/reject step.

use std::fmt;
use std::fmt::{Debug, Formatter};

use rand::Rng;

/// Outcome of a Metropolis accept/reject decision, carrying the clamped
/// log acceptance probability.
pub enum MHStatus {
    Accepted(f64),
    Rejected(f64),
}

impl Debug for MHStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        use MHStatus::*;
        match *self {
            Accepted(l) => write!(f, "Accepted({})", l.exp()),
            Rejected(l) => write!(f, "Rejected({})", l.exp()),
        }
    }
}

/// Decide a Metropolis step from the log acceptance ratio.
///
/// # Parameters
/// * `rng` - Random number generator
/// * `log_alpha` - Log of the acceptance ratio; `min(0, log_alpha)` is the
///   log acceptance probability
pub fn metropolis_select<R: Rng>(rng: &mut R, log_alpha: f64) -> MHStatus {
    debug_assert!(!log_alpha.is_nan(), "acceptance ratio must not be NaN");
    let clamped = log_alpha.min(0.0);

    if clamped == 0.0 || rng.gen::<f64>().ln() < log_alpha {
        MHStatus::Accepted(clamped)
    } else {
        MHStatus::Rejected(clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn nonnegative_ratio_always_accepts() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert!(matches!(
                metropolis_select(&mut rng, 0.0),
                MHStatus::Accepted(_)
            ));
            assert!(matches!(
                metropolis_select(&mut rng, 2.5),
                MHStatus::Accepted(_)
            ));
        }
    }

    #[test]
    fn hopeless_ratio_always_rejects() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert!(matches!(
                metropolis_select(&mut rng, -1e9),
                MHStatus::Rejected(_)
            ));
        }
    }

    #[test]
    fn middling_ratio_accepts_at_its_rate() {
        let mut rng = StdRng::seed_from_u64(1);
        let log_alpha = 0.5f64.ln();
        let accepted = (0..20_000)
            .filter(|_| matches!(metropolis_select(&mut rng, log_alpha), MHStatus::Accepted(_)))
            .count();
        let rate = accepted as f64 / 20_000.0;
        assert!((rate - 0.5).abs() < 0.02, "rate = {}", rate);
    }
}
