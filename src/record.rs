use crate::address::Address;
use crate::erp::{Erp, ErpKind};

/// Value drawn from an ERP.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Real(f64),
    /// Zero-based category index drawn by `multinomial`.
    Nat(usize),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match *self {
            Value::Real(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_nat(&self) -> Option<usize> {
        match *self {
            Value::Nat(n) => Some(n),
            _ => None,
        }
    }
}

/// One random choice made by a run of a generative procedure.
///
/// The address is fixed for the record's lifetime; the value changes only
/// under a proposal, and the params/log-density are refreshed on every
/// replay that reaches the record (params may be computed from earlier
/// choices, so they can drift between runs while the value is kept).
#[derive(Clone, Debug)]
pub struct Record {
    pub(crate) address: Address,
    pub(crate) erp: Erp,
    pub(crate) value: Value,
    pub(crate) depth: usize,
    pub(crate) logp: f64,
    pub(crate) index: usize,
}

impl Record {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn erp(&self) -> &Erp {
        &self.erp
    }

    pub fn kind(&self) -> ErpKind {
        self.erp.kind()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Frame-stack depth at the time the choice was first made.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// `log P(value | params)` under the params of the latest run.
    pub fn logp(&self) -> f64 {
        self.logp
    }

    /// Position in the execution order of the latest run.
    pub fn index(&self) -> usize {
        self.index
    }
}
