//! Pseudo-procedures: named intrinsics standing in for instructions whose
//! semantics the IR cannot express directly.
//!
//! The table is shared by every rewriter run against one host. Requesting the
//! same name twice yields the same [`Arc`]; requesting it with a different
//! arity is an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ir::DataType;
use crate::LiftError;

/// Names of the pseudo-procedures the back-ends emit.
pub mod names {
    pub const DAW: &str = "__daw";
    pub const RLCF: &str = "__rlcf";
    pub const RRCF: &str = "__rrcf";
    pub const ROL: &str = "__rol";
    pub const ROR: &str = "__ror";
    pub const RCL: &str = "__rcl";
    pub const RCR: &str = "__rcr";
    pub const SWAPF: &str = "__swapf";
    pub const SLEEP: &str = "__sleep";
    pub const CLRWDT: &str = "__clrwdt";
    pub const RESET: &str = "__reset";
    pub const TBLRD: &str = "__tblrd";
    pub const TBLWT: &str = "__tblwt";
    pub const SHLD: &str = "__shld";
    pub const SHRD: &str = "__shrd";
    pub const BSR: &str = "__bsr";
    pub const BSWAP: &str = "__bswap";
    pub const BT: &str = "__bt";
    pub const AAA: &str = "__aaa";
    pub const AAM: &str = "__aam";
    pub const DAA: &str = "__daa";
    pub const DAS: &str = "__das";
    pub const CLI: &str = "__cli";
    pub const STI: &str = "__sti";
    pub const HLT: &str = "__hlt";
    pub const SYSCALL: &str = "__syscall";
    pub const IN: &str = "__in";
    pub const OUT: &str = "__out";
    pub const SIN: &str = "sin";
    pub const COS: &str = "cos";
    pub const SQRT: &str = "sqrt";
    pub const ATAN: &str = "atan";
    pub const LG2: &str = "lg2";
    pub const RNDINT: &str = "__rndint";
    pub const FXAM: &str = "__fxam";
    pub const FCLEX: &str = "__fclex";
    pub const ARPL: &str = "__arpl";
}

/// A named intrinsic with a fixed arity and return type.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PseudoProcedure {
    pub name: String,
    pub return_type: DataType,
    pub arity: usize,
}

/// Services a rewriter needs from its environment.
pub trait RewriterHost: Send + Sync {
    /// Look up `name`, registering it on first use. Fails when `name` is
    /// already registered with a different arity.
    fn ensure_pseudo_procedure(
        &self,
        name: &str,
        return_type: DataType,
        arity: usize,
    ) -> Result<Arc<PseudoProcedure>, LiftError>;
}

/// Default [`RewriterHost`] backed by a shared table.
#[derive(Debug, Default)]
pub struct PseudoProcedureTable {
    procedures: Mutex<HashMap<String, Arc<PseudoProcedure>>>,
}

impl PseudoProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct pseudo-procedures registered so far.
    pub fn len(&self) -> usize {
        self.procedures.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.procedures.lock() {
            Ok(table) => table.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

impl RewriterHost for PseudoProcedureTable {
    fn ensure_pseudo_procedure(
        &self,
        name: &str,
        return_type: DataType,
        arity: usize,
    ) -> Result<Arc<PseudoProcedure>, LiftError> {
        let mut table = self
            .procedures
            .lock()
            .map_err(|_| LiftError::Generic("pseudo-procedure table poisoned".to_string()))?;
        if let Some(existing) = table.get(name) {
            if existing.arity != arity {
                return Err(LiftError::ArityMismatch {
                    name: name.to_string(),
                    expected: existing.arity,
                    actual: arity,
                });
            }
            return Ok(Arc::clone(existing));
        }
        log::trace!("registering pseudo-procedure {}/{}", name, arity);
        let procedure = Arc::new(PseudoProcedure {
            name: name.to_string(),
            return_type,
            arity,
        });
        table.insert(name.to_string(), Arc::clone(&procedure));
        Ok(procedure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_procedure() {
        let table = PseudoProcedureTable::new();
        let a = table.ensure_pseudo_procedure(names::RLCF, DataType::Byte, 2).unwrap();
        let b = table.ensure_pseudo_procedure(names::RLCF, DataType::Byte, 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_arity_mismatch_names_procedure() {
        let table = PseudoProcedureTable::new();
        table.ensure_pseudo_procedure(names::ROL, DataType::Byte, 2).unwrap();
        let err = table
            .ensure_pseudo_procedure(names::ROL, DataType::Byte, 3)
            .unwrap_err();
        match &err {
            LiftError::ArityMismatch { name, expected, actual } => {
                assert_eq!(name, "__rol");
                assert_eq!((*expected, *actual), (2, 3));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("__rol"));
    }

    #[test]
    fn test_shared_across_threads() {
        let table = Arc::new(PseudoProcedureTable::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    table.ensure_pseudo_procedure(names::SWAPF, DataType::Byte, 1).unwrap()
                })
            })
            .collect();
        let procs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(procs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(table.names(), vec!["__swapf".to_string()]);
    }
}
