//! Error types for solver operations.

use thiserror::Error;

use crate::options::{CalculationMethod, FaultPhase, FaultType};

/// Kind of numerical failure raised by the block LU factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseMatrixErrorKind {
    /// Largest pivot in a diagonal block is below the pivot tolerance.
    Singular,
    /// A pivot is NaN or infinite.
    NotFinite,
}

/// Errors that can occur while building admittance matrices or running a solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("invalid topology: {what}")]
    InvalidTopology { what: String },

    #[error("invalid calculation input: {what}")]
    InvalidInput { what: String },

    #[error("invalid measurement: {what}")]
    InvalidMeasurement { what: String },

    #[error("calculation method {method:?} is not supported for {calculation}")]
    InvalidCalculationMethod {
        method: CalculationMethod,
        calculation: &'static str,
    },

    #[error("short circuit type {fault_type:?} is not supported in {mode} calculation")]
    InvalidShortCircuitType {
        fault_type: FaultType,
        mode: &'static str,
    },

    #[error("fault phase {fault_phase:?} does not match fault type {fault_type:?}")]
    InvalidShortCircuitPhases {
        fault_type: FaultType,
        fault_phase: FaultPhase,
    },

    #[error("fault admittance has infinite real part but finite imaginary part: {re} + j{im}")]
    InvalidFaultAdmittance { re: f64, im: f64 },

    #[error(
        "iteration failed to converge after {num_iter} iterations: \
         max deviation {max_dev:e}, error tolerance {err_tol:e}"
    )]
    IterationDiverge {
        num_iter: usize,
        max_dev: f64,
        err_tol: f64,
    },

    #[error("sparse matrix error at block row {bus}: {kind:?} pivot")]
    SparseMatrix {
        bus: usize,
        kind: SparseMatrixErrorKind,
    },
}

pub type Result<T> = std::result::Result<T, SolverError>;
