//! Runtime selection of solver implementations.
//!
//! A [DispatchConfig] is a table of plain function pointers created once for
//! a concrete solver type. A [MathSolverProxy] owns a type-erased solver
//! created through such a table and forwards every call to it, so the call
//! site never names the concrete type and the solver's inner loops stay
//! monomorphic.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SolverError};
use crate::math_solver::MathSolver;
use crate::options::CalculationOptions;
use crate::params::{PowerFlowInput, ShortCircuitInput, StateEstimationInput};
use crate::solver_output::{ShortCircuitSolverOutput, SolverOutput};
use crate::tensor::{ASYMMETRIC, SYMMETRIC};
use crate::timer::CalculationInfo;
use crate::topology::MathModelTopology;
use crate::ybus::YBus;

/// Operations a concrete solver provides for `N` phases.
pub trait MathSolverImpl<const N: usize>: Clone + Send + 'static {
    fn new(topo: Arc<MathModelTopology>) -> Self;

    fn run_power_flow(
        &mut self,
        y_bus: &YBus<N>,
        input: &PowerFlowInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>>;

    fn run_state_estimation(
        &mut self,
        y_bus: &YBus<N>,
        input: &StateEstimationInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>>;

    fn run_short_circuit(
        &mut self,
        y_bus: &YBus<N>,
        input: &ShortCircuitInput,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<ShortCircuitSolverOutput<N>>;

    fn clear_solver(&mut self);

    fn parameters_changed(&mut self, changed: bool);
}

impl<const N: usize> MathSolverImpl<N> for MathSolver<N> {
    fn new(topo: Arc<MathModelTopology>) -> Self {
        MathSolver::new(topo)
    }

    fn run_power_flow(
        &mut self,
        y_bus: &YBus<N>,
        input: &PowerFlowInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        MathSolver::run_power_flow(self, y_bus, input, options, info)
    }

    fn run_state_estimation(
        &mut self,
        y_bus: &YBus<N>,
        input: &StateEstimationInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        MathSolver::run_state_estimation(self, y_bus, input, options, info)
    }

    fn run_short_circuit(
        &mut self,
        y_bus: &YBus<N>,
        input: &ShortCircuitInput,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<ShortCircuitSolverOutput<N>> {
        MathSolver::run_short_circuit(self, y_bus, input, options, info)
    }

    fn clear_solver(&mut self) {
        MathSolver::clear_solver(self)
    }

    fn parameters_changed(&mut self, changed: bool) {
        MathSolver::parameters_changed(self, changed)
    }
}

type Opaque = Box<dyn Any + Send>;

fn mismatch() -> SolverError {
    SolverError::InvalidInput {
        what: "solver handle does not belong to this dispatch table".to_string(),
    }
}

/// Entry points of one solver type for `N` phases.
#[derive(Clone, Copy)]
pub struct DispatchConfig<const N: usize> {
    create: fn(Arc<MathModelTopology>) -> Opaque,
    copy: fn(&Opaque) -> Opaque,
    #[allow(clippy::type_complexity)]
    run_power_flow: fn(
        &mut Opaque,
        &YBus<N>,
        &PowerFlowInput<N>,
        &CalculationOptions,
        &mut CalculationInfo,
    ) -> Result<SolverOutput<N>>,
    #[allow(clippy::type_complexity)]
    run_state_estimation: fn(
        &mut Opaque,
        &YBus<N>,
        &StateEstimationInput<N>,
        &CalculationOptions,
        &mut CalculationInfo,
    ) -> Result<SolverOutput<N>>,
    #[allow(clippy::type_complexity)]
    run_short_circuit: fn(
        &mut Opaque,
        &YBus<N>,
        &ShortCircuitInput,
        &CalculationOptions,
        &mut CalculationInfo,
    ) -> Result<ShortCircuitSolverOutput<N>>,
    clear_solver: fn(&mut Opaque),
    parameters_changed: fn(&mut Opaque, bool),
}

impl<const N: usize> fmt::Debug for DispatchConfig<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchConfig").field("phases", &N).finish_non_exhaustive()
    }
}

impl<const N: usize> DispatchConfig<N> {
    pub fn of<T: MathSolverImpl<N>>() -> Self {
        Self {
            create: |topo| Box::new(T::new(topo)) as Opaque,
            // a proxy only ever holds solvers made by its own table's `create`
            copy: |s| match s.downcast_ref::<T>() {
                Some(s) => Box::new(s.clone()) as Opaque,
                None => panic!("{}", mismatch()),
            },
            run_power_flow: |s, y_bus, input, options, info| {
                s.downcast_mut::<T>()
                    .ok_or_else(mismatch)?
                    .run_power_flow(y_bus, input, options, info)
            },
            run_state_estimation: |s, y_bus, input, options, info| {
                s.downcast_mut::<T>()
                    .ok_or_else(mismatch)?
                    .run_state_estimation(y_bus, input, options, info)
            },
            run_short_circuit: |s, y_bus, input, options, info| {
                s.downcast_mut::<T>()
                    .ok_or_else(mismatch)?
                    .run_short_circuit(y_bus, input, options, info)
            },
            clear_solver: |s| {
                if let Some(s) = s.downcast_mut::<T>() {
                    s.clear_solver();
                }
            },
            parameters_changed: |s, changed| {
                if let Some(s) = s.downcast_mut::<T>() {
                    s.parameters_changed(changed);
                }
            },
        }
    }
}

/// Solver types used for symmetric and asymmetric calculations.
pub trait SolverFamily {
    type Sym: MathSolverImpl<SYMMETRIC>;
    type Asym: MathSolverImpl<ASYMMETRIC>;
}

pub struct DefaultSolvers;

impl SolverFamily for DefaultSolvers {
    type Sym = MathSolver<SYMMETRIC>;
    type Asym = MathSolver<ASYMMETRIC>;
}

/// Dispatch tables for both symmetries of one [SolverFamily].
#[derive(Debug, Clone, Copy)]
pub struct MathSolverDispatcher {
    sym: DispatchConfig<SYMMETRIC>,
    asym: DispatchConfig<ASYMMETRIC>,
}

impl MathSolverDispatcher {
    pub fn new<F: SolverFamily>() -> Self {
        Self {
            sym: DispatchConfig::of::<F::Sym>(),
            asym: DispatchConfig::of::<F::Asym>(),
        }
    }

    pub fn config<const N: usize>(&self) -> DispatchConfig<N>
    where
        Self: SelectConfig<N>,
    {
        self.select()
    }
}

impl Default for MathSolverDispatcher {
    fn default() -> Self {
        Self::new::<DefaultSolvers>()
    }
}

/// Picks the table for `N` phases; only implemented for 1 and 3.
pub trait SelectConfig<const N: usize> {
    fn select(&self) -> DispatchConfig<N>;
}

impl SelectConfig<SYMMETRIC> for MathSolverDispatcher {
    fn select(&self) -> DispatchConfig<SYMMETRIC> {
        self.sym
    }
}

impl SelectConfig<ASYMMETRIC> for MathSolverDispatcher {
    fn select(&self) -> DispatchConfig<ASYMMETRIC> {
        self.asym
    }
}

/// Owning handle to a solver created through a [DispatchConfig].
#[derive(Debug)]
pub struct MathSolverProxy<const N: usize> {
    config: DispatchConfig<N>,
    topo: Arc<MathModelTopology>,
    solver: Opaque,
}

impl<const N: usize> MathSolverProxy<N> {
    pub fn new(dispatcher: &MathSolverDispatcher, topo: Arc<MathModelTopology>) -> Self
    where
        MathSolverDispatcher: SelectConfig<N>,
    {
        Self::with_config(dispatcher.config::<N>(), topo)
    }

    pub fn with_config(config: DispatchConfig<N>, topo: Arc<MathModelTopology>) -> Self {
        Self {
            solver: (config.create)(Arc::clone(&topo)),
            config,
            topo,
        }
    }

    /// The concrete solver, if it is a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.solver.downcast_ref::<T>()
    }

    pub fn run_power_flow(
        &mut self,
        y_bus: &YBus<N>,
        input: &PowerFlowInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        (self.config.run_power_flow)(&mut self.solver, y_bus, input, options, info)
    }

    pub fn run_state_estimation(
        &mut self,
        y_bus: &YBus<N>,
        input: &StateEstimationInput<N>,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        (self.config.run_state_estimation)(&mut self.solver, y_bus, input, options, info)
    }

    pub fn run_short_circuit(
        &mut self,
        y_bus: &YBus<N>,
        input: &ShortCircuitInput,
        options: &CalculationOptions,
        info: &mut CalculationInfo,
    ) -> Result<ShortCircuitSolverOutput<N>> {
        (self.config.run_short_circuit)(&mut self.solver, y_bus, input, options, info)
    }

    pub fn clear_solver(&mut self) {
        (self.config.clear_solver)(&mut self.solver)
    }

    pub fn parameters_changed(&mut self, changed: bool) {
        (self.config.parameters_changed)(&mut self.solver, changed)
    }
}

impl<const N: usize> Clone for MathSolverProxy<N> {
    /// Deep copy of the solver state.
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            topo: Arc::clone(&self.topo),
            solver: (self.config.copy)(&self.solver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CalculationMethod;
    use crate::tests::{feeder_input, radial_feeder};
    use anyhow::{format_err, Result};

    /// Records which entry points were reached.
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Vec<&'static str>,
    }

    impl<const N: usize> MathSolverImpl<N> for Recorder {
        fn new(_: Arc<MathModelTopology>) -> Self {
            Self::default()
        }

        fn run_power_flow(
            &mut self,
            _: &YBus<N>,
            _: &PowerFlowInput<N>,
            _: &CalculationOptions,
            _: &mut CalculationInfo,
        ) -> crate::Result<SolverOutput<N>> {
            self.calls.push("power flow");
            Ok(SolverOutput::default())
        }

        fn run_state_estimation(
            &mut self,
            _: &YBus<N>,
            _: &StateEstimationInput<N>,
            _: &CalculationOptions,
            _: &mut CalculationInfo,
        ) -> crate::Result<SolverOutput<N>> {
            self.calls.push("state estimation");
            Ok(SolverOutput::default())
        }

        fn run_short_circuit(
            &mut self,
            _: &YBus<N>,
            _: &ShortCircuitInput,
            _: &CalculationOptions,
            _: &mut CalculationInfo,
        ) -> crate::Result<ShortCircuitSolverOutput<N>> {
            self.calls.push("short circuit");
            Ok(ShortCircuitSolverOutput::default())
        }

        fn clear_solver(&mut self) {
            self.calls.push("clear");
        }

        fn parameters_changed(&mut self, changed: bool) {
            self.calls.push(if changed { "changed" } else { "unchanged" });
        }
    }

    struct RecorderFamily;

    impl SolverFamily for RecorderFamily {
        type Sym = Recorder;
        type Asym = Recorder;
    }

    #[test]
    fn proxy_forwards_to_bound_type() -> Result<()> {
        let dispatcher = MathSolverDispatcher::new::<RecorderFamily>();
        let y_bus = radial_feeder::<3>();
        let mut proxy = MathSolverProxy::<3>::new(&dispatcher, Arc::clone(y_bus.shared_topology()));
        let mut info = CalculationInfo::new();
        let options = CalculationOptions::default();
        proxy
            .run_power_flow(&y_bus, &feeder_input(), &options, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        proxy
            .run_state_estimation(&y_bus, &Default::default(), &options, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        proxy.parameters_changed(true);

        let mut copy = proxy.clone();
        copy.clear_solver();
        let calls = |p: &MathSolverProxy<3>| p.downcast_ref::<Recorder>().map(|r| r.calls.clone());
        assert_eq!(
            calls(&proxy),
            Some(vec!["power flow", "state estimation", "changed"])
        );
        assert_eq!(
            calls(&copy),
            Some(vec!["power flow", "state estimation", "changed", "clear"])
        );
        assert!(proxy.downcast_ref::<MathSolver<3>>().is_none());
        Ok(())
    }

    #[test]
    fn clone_copies_solver_state() -> Result<()> {
        let dispatcher = MathSolverDispatcher::default();
        let y_bus = radial_feeder::<1>();
        let mut proxy = MathSolverProxy::<1>::new(&dispatcher, Arc::clone(y_bus.shared_topology()));
        let mut info = CalculationInfo::new();
        let options = CalculationOptions {
            method: CalculationMethod::Linear,
            ..Default::default()
        };
        let first = proxy
            .run_power_flow(&y_bus, &feeder_input(), &options, &mut info)
            .map_err(|e| format_err!("{}", e))?;

        let mut copy = proxy.clone();
        proxy.clear_solver();
        let linear = |p: &MathSolverProxy<1>| {
            p.downcast_ref::<MathSolver<1>>()
                .and_then(|s| s.linear_pf())
                .map(|s| s.is_prefactorized())
        };
        assert_eq!(linear(&proxy), None);
        assert_eq!(linear(&copy), Some(true));

        let second = copy
            .run_power_flow(&y_bus, &feeder_input(), &options, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        assert_eq!(first.u, second.u);
        Ok(())
    }

    fn foreign_handle() -> (MathSolverProxy<3>, YBus<3>) {
        let y_bus = radial_feeder::<3>();
        let topo = Arc::clone(y_bus.shared_topology());
        let proxy = MathSolverProxy {
            config: DispatchConfig::of::<Recorder>(),
            solver: Box::new(MathSolver::<3>::new(Arc::clone(&topo))),
            topo,
        };
        (proxy, y_bus)
    }

    #[test]
    fn foreign_solver_is_rejected() {
        let (mut proxy, y_bus) = foreign_handle();
        let err = proxy.run_power_flow(
            &y_bus,
            &feeder_input(),
            &CalculationOptions::default(),
            &mut CalculationInfo::new(),
        );
        assert!(matches!(err, Err(SolverError::InvalidInput { .. })));
    }

    #[test]
    #[should_panic(expected = "does not belong to this dispatch table")]
    fn clone_never_replaces_foreign_solver() {
        let (proxy, _) = foreign_handle();
        let _ = proxy.clone();
    }
}
