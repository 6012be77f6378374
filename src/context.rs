//! The surface a generative procedure draws through.
//!
//! A `Context` exists only for the duration of one `Trace::run`. It owns
//! the run's bookkeeping: the address stack, the records of the previous
//! run awaiting reuse, the records of the run in progress, and the
//! log-probability accumulators. Threading it through the procedure (as
//! opposed to process-global state) is what lets traces be copied and
//! replayed freely.

use std::collections::BTreeMap;

use rand::RngCore;

use crate::address::{Address, AddressStack};
use crate::erp::Erp;
use crate::error::Error;
use crate::record::{Record, Value};

pub struct Context<'r> {
    pub(crate) rng: &'r mut dyn RngCore,
    pub(crate) stack: AddressStack,
    pub(crate) prev: BTreeMap<Address, Record>,
    pub(crate) records: BTreeMap<Address, Record>,
    pub(crate) exec_order: Vec<Address>,
    pub(crate) log_prior: f64,
    pub(crate) log_likelihood: f64,
    pub(crate) new_log_prob: f64,
    pub(crate) old_log_prob: f64,
    /// Sequential index of the record under proposal, when replaying one.
    pub(crate) gate: Option<usize>,
}

impl<'r> Context<'r> {
    pub(crate) fn new(
        rng: &'r mut dyn RngCore,
        prev: BTreeMap<Address, Record>,
        gate: Option<usize>,
    ) -> Self {
        Context {
            rng,
            stack: AddressStack::new(),
            prev,
            records: BTreeMap::new(),
            exec_order: Vec::new(),
            log_prior: 0.0,
            log_likelihood: 0.0,
            new_log_prob: 0.0,
            old_log_prob: 0.0,
            gate,
        }
    }

    /// Draw a Bernoulli choice with success probability `p`.
    pub fn flip(&mut self, p: f64) -> Result<bool, Error> {
        let value = self.lookup_or_sample(Erp::Flip { p })?;
        value
            .as_bool()
            .ok_or_else(|| Error::invariant("flip record holds a non-boolean value"))
    }

    /// Draw from the continuous uniform on `[lo, hi]`.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> Result<f64, Error> {
        let value = self.lookup_or_sample(Erp::Uniform { lo, hi })?;
        value
            .as_real()
            .ok_or_else(|| Error::invariant("uniform record holds a non-real value"))
    }

    /// Draw a zero-based category index proportional to `weights`
    /// (un-normalized weights are fine).
    pub fn multinomial(&mut self, weights: &[f64]) -> Result<usize, Error> {
        let value = self.lookup_or_sample(Erp::Multinomial {
            weights: weights.to_vec(),
        })?;
        value
            .as_nat()
            .ok_or_else(|| Error::invariant("multinomial record holds a non-index value"))
    }

    /// Draw from a normal with mean `mu` and stdev `sigma`.
    pub fn gaussian(&mut self, mu: f64, sigma: f64) -> Result<f64, Error> {
        let value = self.lookup_or_sample(Erp::Gaussian { mu, sigma })?;
        value
            .as_real()
            .ok_or_else(|| Error::invariant("gaussian record holds a non-real value"))
    }

    /// Add an explicit log-likelihood contribution.
    pub fn factor(&mut self, logp: f64) -> Result<(), Error> {
        if logp.is_nan() {
            return Err(Error::invariant("factor called with NaN"));
        }
        self.log_likelihood += logp;
        if self.log_likelihood.is_nan() {
            return Err(Error::invariant("NaN in likelihood accumulation"));
        }
        if self.log_likelihood == f64::NEG_INFINITY {
            return Err(Error::ImpossibleTrace);
        }
        Ok(())
    }

    /// Synonym of [`factor`](Context::factor).
    pub fn likelihood(&mut self, logp: f64) -> Result<(), Error> {
        self.factor(logp)
    }

    /// The error a procedure returns to abort the run as impossible.
    pub fn zero_probability(&self) -> Error {
        Error::ImpossibleTrace
    }

    pub fn push_address(&mut self, site: u32) {
        self.stack.push(site);
    }

    pub fn pop_address(&mut self) -> Result<(), Error> {
        self.stack.pop()
    }

    /// Rename the top frame for the current loop iteration. Must be
    /// called before each iteration that reaches an ERP, or iterations
    /// collide on one address.
    pub fn set_loop_index(&mut self, index: u32) -> Result<(), Error> {
        self.stack.set_loop_index(index)
    }

    /// Run `f` under a pushed frame, popping it on every exit path.
    ///
    /// The raw push/pop operations above stay available for generated
    /// code; this is the form hand-written procedures should prefer.
    pub fn site<U, F>(&mut self, id: u32, f: F) -> Result<U, Error>
    where
        F: FnOnce(&mut Self) -> Result<U, Error>,
    {
        self.push_address(id);
        let out = f(self);
        self.pop_address()?;
        out
    }

    /// Current frame-stack depth (mostly useful to tests and demos).
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Current structural address.
    pub fn address(&self) -> Address {
        self.stack.address()
    }

    /// Resolve one ERP call: reuse the record at the current address if
    /// the previous run left a matching one, otherwise sample fresh.
    fn lookup_or_sample(&mut self, erp: Erp) -> Result<Value, Error> {
        erp.validate()?;
        let address = self.stack.address();
        if self.records.contains_key(&address) {
            return Err(Error::invariant(format!(
                "address {} visited twice in one run",
                address
            )));
        }
        let index = self.exec_order.len();

        match self.prev.remove(&address) {
            Some(mut record) if record.erp.kind() == erp.kind() => {
                // Reuse: keep the value, adopt the new params, rescore.
                record.erp = erp;
                record.logp = record.erp.logprob(&record.value);
                record.index = index;
                record.depth = self.stack.depth();
                self.checked(record.logp)?;
                self.log_prior += record.logp;
                let value = record.value.clone();
                self.exec_order.push(address.clone());
                self.records.insert(address, record);
                Ok(value)
            }
            displaced => {
                // Fresh sample. Inside the invariant prefix of a proposal
                // replay nothing may be freshly created: the records before
                // the proposed one must replay identically.
                if let Some(gate) = self.gate {
                    if index <= gate {
                        return Err(Error::invariant(format!(
                            "fresh record at {} inside the invariant prefix of a proposal",
                            address
                        )));
                    }
                }
                if let Some(old) = displaced {
                    // Same address, different kind: the old record is
                    // destroyed by this run.
                    self.old_log_prob += old.logp;
                }
                let value = erp.sample(&mut self.rng);
                let logp = erp.logprob(&value);
                self.checked(logp)?;
                let record = Record {
                    address: address.clone(),
                    erp,
                    value: value.clone(),
                    depth: self.stack.depth(),
                    logp,
                    index,
                };
                self.log_prior += logp;
                self.new_log_prob += logp;
                self.exec_order.push(address.clone());
                self.records.insert(address, record);
                Ok(value)
            }
        }
    }

    fn checked(&self, logp: f64) -> Result<(), Error> {
        if logp.is_nan() {
            return Err(Error::invariant("NaN log-probability from an ERP"));
        }
        if logp == f64::NEG_INFINITY {
            return Err(Error::ImpossibleTrace);
        }
        Ok(())
    }
}
