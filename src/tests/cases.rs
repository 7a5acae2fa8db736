//! Small networks shared by the unit tests.

use std::sync::Arc;

use crate::cmplx;
use crate::params::{BranchCalcParam, MathModelParam, PowerFlowInput, SourceCalcParam};
use crate::tensor::diag_tensor;
use crate::topology::{LoadGenType, MathModelTopology};
use crate::ybus::YBus;

/// Four buses fed from a source at bus 0:
///
/// ```text
/// 0 --- 1 --- 2 (constant power load)
///       |
///       3 (constant impedance load, shunt)
/// ```
pub(crate) fn radial_feeder_topology() -> MathModelTopology {
    let mut topo = MathModelTopology::new(4);
    topo.push_source(0);
    topo.push_load_gen(2, LoadGenType::ConstPq);
    topo.push_load_gen(3, LoadGenType::ConstY);
    topo.push_shunt(3);
    topo.push_branch(Some(0), Some(1));
    topo.push_branch(Some(1), Some(2));
    topo.push_branch(Some(1), Some(3));
    topo
}

pub(crate) fn radial_feeder_param<const N: usize>() -> MathModelParam<N> {
    let line = BranchCalcParam::pi_model(cmplx!(8.0, -16.0), cmplx!(0.0, 0.01));
    MathModelParam {
        branch_param: vec![line, line, line],
        shunt_param: vec![diag_tensor(cmplx!(0.0, 0.05))],
        source_param: vec![SourceCalcParam::from_sequence(cmplx!(100.0, -1000.0), cmplx!(100.0, -1000.0))],
    }
}

pub(crate) fn radial_feeder<const N: usize>() -> YBus<N> {
    YBus::new(Arc::new(radial_feeder_topology()), Arc::new(radial_feeder_param())).unwrap()
}

pub(crate) fn feeder_input<const N: usize>() -> PowerFlowInput<N> {
    PowerFlowInput {
        source: vec![cmplx!(1.02)],
        s_injection: vec![[cmplx!(-0.4, -0.1); N], [cmplx!(-0.2, -0.05); N]],
    }
}
