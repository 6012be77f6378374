//! # Sampling drivers
//!
//! Outer loops over [`Chain`](crate::chain::Chain) and
//! [`Trace`](crate::trace::Trace): single-chain Metropolis-Hastings,
//! parallel tempering, and the rejection/forward samplers used for
//! initialization and sanity checks.

pub mod helpers;
pub mod mh;
pub mod rejection;
pub mod tempering;

pub use self::mh::{MhSampler, MhSummary};
pub use self::rejection::{forward_sample, rejection_sample};
pub use self::tempering::{TemperedSampler, TemperedSummary};
