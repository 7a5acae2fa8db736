//! Per-symmetry aggregate of the concrete solvers.

use std::sync::Arc;

use crate::error::{Result, SolverError};
use crate::linear_pf::LinearPfSolver;
use crate::newton_pf::NewtonRaphsonPfSolver;
use crate::newton_se::NewtonRaphsonSeSolver;
use crate::options::{CalculationMethod, CalculationOptions};
use crate::params::{PowerFlowInput, ShortCircuitInput, StateEstimationInput};
use crate::short_circuit::ShortCircuitSolver;
use crate::solver_output::{ShortCircuitSolverOutput, SolverOutput};
use crate::timer::CalculationInfo;
use crate::topology::MathModelTopology;
use crate::ybus::YBus;

/// Creates the solver for a calculation on first use and keeps it, with its
/// buffers and factorizations, for later calls.
#[derive(Debug, Clone)]
pub struct MathSolver<const N: usize> {
    topo: Arc<MathModelTopology>,
    newton_pf: Option<NewtonRaphsonPfSolver<N>>,
    linear_pf: Option<LinearPfSolver<N>>,
    newton_se: Option<NewtonRaphsonSeSolver<N>>,
    short_circuit: Option<ShortCircuitSolver<N>>,
}

impl<const N: usize> MathSolver<N> {
    pub fn new(topo: Arc<MathModelTopology>) -> Self {
        Self {
            topo,
            newton_pf: None,
            linear_pf: None,
            newton_se: None,
            short_circuit: None,
        }
    }

    fn check_topology(&self, y_bus: &YBus<N>) -> Result<()> {
        if !Arc::ptr_eq(&self.topo, y_bus.shared_topology()) {
            return Err(SolverError::InvalidTopology {
                what: "admittance matrix was built for another topology".to_string(),
            });
        }
        Ok(())
    }

    pub fn run_power_flow(
        &mut self,
        y_bus: &YBus<N>,
        input: &PowerFlowInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        self.check_topology(y_bus)?;
        match options.method {
            CalculationMethod::NewtonRaphson => self
                .newton_pf
                .get_or_insert_with(|| NewtonRaphsonPfSolver::new(y_bus))
                .run_power_flow(y_bus, input, options.err_tol, options.max_iter, info),
            CalculationMethod::Linear => self
                .linear_pf
                .get_or_insert_with(|| LinearPfSolver::new(y_bus))
                .run_power_flow(y_bus, input, info),
            method => Err(SolverError::InvalidCalculationMethod {
                method,
                calculation: "power flow",
            }),
        }
    }

    pub fn run_state_estimation(
        &mut self,
        y_bus: &YBus<N>,
        input: &StateEstimationInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        self.check_topology(y_bus)?;
        match options.method {
            CalculationMethod::NewtonRaphson => self
                .newton_se
                .get_or_insert_with(|| NewtonRaphsonSeSolver::new(y_bus))
                .run_state_estimation(y_bus, input, options.err_tol, options.max_iter, info),
            method => Err(SolverError::InvalidCalculationMethod {
                method,
                calculation: "state estimation",
            }),
        }
    }

    /// Sources are scaled by the IEC 60909 voltage factor picked by
    /// `options.voltage_scaling` for the rated voltage of the network.
    pub fn run_short_circuit(
        &mut self,
        y_bus: &YBus<N>,
        input: &ShortCircuitInput,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<ShortCircuitSolverOutput<N>> {
        self.check_topology(y_bus)?;
        match options.method {
            CalculationMethod::Iec60909 => {
                let c = options.voltage_scaling.factor(input.u_rated);
                self.short_circuit
                    .get_or_insert_with(|| ShortCircuitSolver::new(y_bus))
                    .run_short_circuit(y_bus, input, c, info)
            }
            method => Err(SolverError::InvalidCalculationMethod {
                method,
                calculation: "short circuit",
            }),
        }
    }

    /// Drops all solvers and their buffers.
    pub fn clear_solver(&mut self) {
        self.newton_pf = None;
        self.linear_pf = None;
        self.newton_se = None;
        self.short_circuit = None;
    }

    /// Invalidates cached factorizations when the admittance values changed.
    pub fn parameters_changed(&mut self, changed: bool) {
        if !changed {
            return;
        }
        if let Some(solver) = self.linear_pf.as_mut() {
            solver.parameters_changed();
        }
    }

    pub fn linear_pf(&self) -> Option<&LinearPfSolver<N>> {
        self.linear_pf.as_ref()
    }
}
