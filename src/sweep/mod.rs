//! Drivers that pull clusters out of the lazy rewriting stream.

use std::fmt;

use clap::ValueEnum;

pub mod linear;
pub mod procedures;

pub use procedures::ProcedureTrace;

/// Available sweeps.
#[derive(Copy, Clone, ValueEnum, Debug, PartialEq, Eq, Default)]
pub enum Sweep {
    /// Rewrite the whole image from its first byte
    #[default]
    Linear,
    /// Rewrite from each entry point until control leaves the trace
    Procedures,
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sweep::Linear => write!(f, "Linear sweep"),
            Sweep::Procedures => write!(f, "Procedure traces"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_display() {
        assert_eq!(Sweep::Linear.to_string(), "Linear sweep");
        assert_eq!(Sweep::Procedures.to_string(), "Procedure traces");
        assert_eq!(Sweep::from_str("procedures", true), Ok(Sweep::Procedures));
    }
}
