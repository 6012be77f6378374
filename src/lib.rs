//! Trace-based lightweight Metropolis-Hastings.
//!
//! A generative procedure draws from primitive distributions through a
//! [`Context`]; every draw is recorded in a structured [`Trace`] keyed by
//! the structural address of its callsite. The MH samplers perturb one
//! recorded choice at a time and replay the procedure, reusing whatever
//! the control flow still reaches and correcting the acceptance ratio
//! for the choices created or destroyed along the way.

pub mod address;
pub mod chain;
pub mod context;
pub mod erp;
pub mod error;
pub mod record;
pub mod samplers;
pub mod trace;
pub mod utils;

pub use crate::address::{Address, AddressStack, Frame};
pub use crate::chain::Chain;
pub use crate::context::Context;
pub use crate::erp::{Erp, ErpKind, Proposal};
pub use crate::error::Error;
pub use crate::record::{Record, Value};
pub use crate::samplers::mh::{MhSampler, MhSummary};
pub use crate::samplers::rejection::{forward_sample, rejection_sample};
pub use crate::samplers::tempering::{TemperedSampler, TemperedSummary};
pub use crate::trace::Trace;
