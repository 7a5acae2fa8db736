//! Output records and the calculation of element results from solved bus
//! voltages.

use num_complex::Complex64;
use std::array::from_fn;

use crate::params::{PowerFlowInput, SourceCalcParam};
use crate::tensor::{mat_vec, phasor, power, zero_value, ComplexValue};
use crate::topology::LoadGenType;
use crate::ybus::YBus;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchSolverOutput<const N: usize> {
    pub s_f: ComplexValue<N>,
    pub s_t: ComplexValue<N>,
    pub i_f: ComplexValue<N>,
    pub i_t: ComplexValue<N>,
}

/// Power and current injected into the bus by an appliance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplianceSolverOutput<const N: usize> {
    pub s: ComplexValue<N>,
    pub i: ComplexValue<N>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverOutput<const N: usize> {
    pub u: Vec<ComplexValue<N>>,
    pub bus_injection: Vec<ComplexValue<N>>,
    pub branch: Vec<BranchSolverOutput<N>>,
    pub source: Vec<ApplianceSolverOutput<N>>,
    pub shunt: Vec<ApplianceSolverOutput<N>>,
    pub load_gen: Vec<ApplianceSolverOutput<N>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultShortCircuitSolverOutput<const N: usize> {
    pub i_fault: ComplexValue<N>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchShortCircuitSolverOutput<const N: usize> {
    pub i_f: ComplexValue<N>,
    pub i_t: ComplexValue<N>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShortCircuitSolverOutput<const N: usize> {
    pub u_bus: Vec<ComplexValue<N>>,
    pub fault: Vec<FaultShortCircuitSolverOutput<N>>,
    pub branch: Vec<BranchShortCircuitSolverOutput<N>>,
    pub source: Vec<ApplianceSolverOutput<N>>,
    pub shunt: Vec<ApplianceSolverOutput<N>>,
}

impl<const N: usize> Default for BranchSolverOutput<N> {
    fn default() -> Self {
        Self {
            s_f: zero_value(),
            s_t: zero_value(),
            i_f: zero_value(),
            i_t: zero_value(),
        }
    }
}

impl<const N: usize> Default for ApplianceSolverOutput<N> {
    fn default() -> Self {
        Self {
            s: zero_value(),
            i: zero_value(),
        }
    }
}

impl<const N: usize> Default for FaultShortCircuitSolverOutput<N> {
    fn default() -> Self {
        Self {
            i_fault: zero_value(),
        }
    }
}

impl<const N: usize> Default for BranchShortCircuitSolverOutput<N> {
    fn default() -> Self {
        Self {
            i_f: zero_value(),
            i_t: zero_value(),
        }
    }
}

/// Source current `y_ref (u_ref - u)` with the reference voltage rotated by
/// the bus phase shift.
pub fn calculate_source_result<const N: usize>(
    param: &SourceCalcParam<N>,
    u_ref: Complex64,
    phase_shift: f64,
    u: &ComplexValue<N>,
) -> ApplianceSolverOutput<N> {
    let u_src = phasor::<N>(u_ref.norm(), u_ref.arg() + phase_shift);
    let du: ComplexValue<N> = from_fn(|p| u_src[p] - u[p]);
    let i = mat_vec(&param.y_ref, &du);
    ApplianceSolverOutput { s: power(u, &i), i }
}

/// Load/generator injection at voltage `u` for the power `s_spec` specified
/// at nominal voltage.
pub fn calculate_load_gen_result<const N: usize>(
    load_gen_type: LoadGenType,
    s_spec: &ComplexValue<N>,
    u: &ComplexValue<N>,
) -> ApplianceSolverOutput<N> {
    let s: ComplexValue<N> = from_fn(|p| match load_gen_type {
        LoadGenType::ConstPq => s_spec[p],
        LoadGenType::ConstY => s_spec[p] * u[p].norm_sqr(),
        LoadGenType::ConstI => s_spec[p] * u[p].norm(),
    });
    let i = from_fn(|p| (s[p] / u[p]).conj());
    ApplianceSolverOutput { s, i }
}

/// Element results of a power flow solution.
pub fn calculate_pf_result<const N: usize>(
    y_bus: &YBus<N>,
    input: &PowerFlowInput<N>,
    u: Vec<ComplexValue<N>>,
) -> SolverOutput<N> {
    let topo = y_bus.shared_topology();
    let param = y_bus.math_model_param();
    let mut source = Vec::with_capacity(topo.n_source());
    let mut load_gen = Vec::with_capacity(topo.n_load_gen());
    for bus in 0..topo.n_bus() {
        for s in topo.sources(bus) {
            source.push(calculate_source_result(
                &param.source_param[s],
                input.source[s],
                topo.phase_shift[bus],
                &u[bus],
            ));
        }
        for l in topo.load_gens(bus) {
            load_gen.push(calculate_load_gen_result(
                topo.load_gen_type[l],
                &input.s_injection[l],
                &u[bus],
            ));
        }
    }
    SolverOutput {
        bus_injection: y_bus.calculate_injection(&u),
        branch: y_bus.calculate_branch_flow(&u),
        shunt: y_bus.calculate_shunt_flow(&u),
        source,
        load_gen,
        u,
    }
}

/// Branch and shunt currents of a short circuit solution.
pub fn calculate_sc_flows<const N: usize>(
    y_bus: &YBus<N>,
    u: &[ComplexValue<N>],
) -> (
    Vec<BranchShortCircuitSolverOutput<N>>,
    Vec<ApplianceSolverOutput<N>>,
) {
    let branch = y_bus
        .calculate_branch_flow(u)
        .into_iter()
        .map(|b| BranchShortCircuitSolverOutput {
            i_f: b.i_f,
            i_t: b.i_t,
        })
        .collect();
    (branch, y_bus.calculate_shunt_flow(u))
}
