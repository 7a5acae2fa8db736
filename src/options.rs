use derive_builder::Builder;

use crate::error::{Result, SolverError};

/// Numerical method used by a calculation.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum CalculationMethod {
    /// Newton's method (power flow and state estimation).
    #[default]
    NewtonRaphson,
    /// Single linear solve with loads as constant impedances.
    Linear,
    /// IEC 60909 short circuit.
    Iec60909,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FaultType {
    ThreePhase,
    SinglePhaseToGround,
    TwoPhase,
    TwoPhaseToGround,
}

/// Phases affected by a fault.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum FaultPhase {
    Abc,
    A,
    B,
    C,
    Ab,
    Ac,
    Bc,
    /// Resolved from the fault type: `Abc` for three-phase faults,
    /// `A` for single-phase faults and `Bc` for two-phase faults.
    #[default]
    DefaultValue,
}

impl FaultPhase {
    pub fn resolve(self, fault_type: FaultType) -> FaultPhase {
        if self != FaultPhase::DefaultValue {
            return self;
        }
        match fault_type {
            FaultType::ThreePhase => FaultPhase::Abc,
            FaultType::SinglePhaseToGround => FaultPhase::A,
            FaultType::TwoPhase | FaultType::TwoPhaseToGround => FaultPhase::Bc,
        }
    }

    /// Phase indices touched by the fault.
    pub fn indices(self) -> &'static [usize] {
        match self {
            FaultPhase::Abc | FaultPhase::DefaultValue => &[0, 1, 2],
            FaultPhase::A => &[0],
            FaultPhase::B => &[1],
            FaultPhase::C => &[2],
            FaultPhase::Ab => &[0, 1],
            FaultPhase::Ac => &[0, 2],
            FaultPhase::Bc => &[1, 2],
        }
    }
}

impl FaultType {
    /// Checks that the fault type is supported with `n_phase` phases and that
    /// `fault_phase` matches it. Returns the resolved fault phase.
    pub fn check(self, fault_phase: FaultPhase, n_phase: usize) -> Result<FaultPhase> {
        let mode = if n_phase == 1 {
            "symmetric"
        } else {
            "asymmetric"
        };
        let sym_ok = self == FaultType::ThreePhase;
        if (n_phase == 1) != sym_ok {
            return Err(SolverError::InvalidShortCircuitType {
                fault_type: self,
                mode,
            });
        }
        let phase = fault_phase.resolve(self);
        let expected = match self {
            FaultType::ThreePhase => 3,
            FaultType::SinglePhaseToGround => 1,
            FaultType::TwoPhase | FaultType::TwoPhaseToGround => 2,
        };
        if phase.indices().len() != expected {
            return Err(SolverError::InvalidShortCircuitPhases {
                fault_type: self,
                fault_phase,
            });
        }
        Ok(phase)
    }
}

/// Source voltage scaling factor `c` of IEC 60909.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum ShortCircuitVoltageScaling {
    Minimum,
    #[default]
    Maximum,
}

impl ShortCircuitVoltageScaling {
    /// Low voltage networks are those rated at or below 1 kV.
    pub fn factor(self, u_rated: f64) -> f64 {
        match self {
            ShortCircuitVoltageScaling::Maximum => 1.1,
            ShortCircuitVoltageScaling::Minimum if u_rated <= 1e3 => 0.95,
            ShortCircuitVoltageScaling::Minimum => 1.0,
        }
    }
}

/// Options shared by all calculations.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct CalculationOptions {
    pub method: CalculationMethod,

    /// Termination tolerance on the per-unit voltage change between iterations.
    pub err_tol: f64,

    /// Maximum number of iterations.
    pub max_iter: usize,

    pub voltage_scaling: ShortCircuitVoltageScaling,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            method: CalculationMethod::NewtonRaphson,
            err_tol: 1e-8,
            max_iter: 20,
            voltage_scaling: ShortCircuitVoltageScaling::Maximum,
        }
    }
}
