//! Per-element admittance parameters and calculation inputs.

use num_complex::Complex64;

use crate::error::{Result, SolverError};
use crate::options::{FaultPhase, FaultType};
use crate::tensor::{diag_tensor, ComplexTensor, ComplexValue, RealValue};
use crate::topology::MathModelTopology;

fn check_count(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(SolverError::InvalidInput {
            what: format!("{} {} values given for {} elements", actual, name, expected),
        });
    }
    Ok(())
}

/// Two-port admittance of a branch:
/// `[i_f; i_t] = [[yff, yft]; [ytf, ytt]] [u_f; u_t]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchCalcParam<const N: usize> {
    pub yff: ComplexTensor<N>,
    pub yft: ComplexTensor<N>,
    pub ytf: ComplexTensor<N>,
    pub ytt: ComplexTensor<N>,
}

impl<const N: usize> BranchCalcParam<N> {
    /// Series admittance `y_series` with total shunt admittance `y_shunt`
    /// split evenly over both sides.
    pub fn pi_model(y_series: Complex64, y_shunt: Complex64) -> Self {
        let y_self = diag_tensor(y_series + y_shunt / 2.0);
        let y_mutual = diag_tensor(-y_series);
        Self {
            yff: y_self,
            yft: y_mutual,
            ytf: y_mutual,
            ytt: y_self,
        }
    }
}

/// Thevenin equivalent of a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceCalcParam<const N: usize> {
    pub y_ref: ComplexTensor<N>,
}

impl<const N: usize> SourceCalcParam<N> {
    /// Admittance from positive and zero sequence values.
    ///
    /// Symmetric models use `y1`. The phase domain tensor has
    /// `(2 y1 + y0) / 3` on the diagonal and `(y0 - y1) / 3` elsewhere.
    pub fn from_sequence(y1: Complex64, y0: Complex64) -> Self {
        if N == 1 {
            return Self {
                y_ref: diag_tensor(y1),
            };
        }
        let (y_self, y_mutual) = ((2.0 * y1 + y0) / 3.0, (y0 - y1) / 3.0);
        Self {
            y_ref: std::array::from_fn(|i| {
                std::array::from_fn(|j| if i == j { y_self } else { y_mutual })
            }),
        }
    }
}

/// Admittance parameters of all elements, indexed like the topology.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MathModelParam<const N: usize> {
    pub branch_param: Vec<BranchCalcParam<N>>,
    pub shunt_param: Vec<ComplexTensor<N>>,
    pub source_param: Vec<SourceCalcParam<N>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerFlowInput<const N: usize> {
    /// Per-unit reference voltage of each source, phase a.
    pub source: Vec<Complex64>,
    /// Specified power injection of each load/generator at nominal voltage.
    pub s_injection: Vec<ComplexValue<N>>,
}

impl<const N: usize> PowerFlowInput<N> {
    pub fn check(&self, topo: &MathModelTopology) -> Result<()> {
        check_count("source", self.source.len(), topo.n_source())?;
        check_count("load_gen", self.s_injection.len(), topo.n_load_gen())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageSensorCalcParam<const N: usize> {
    pub magnitude: RealValue<N>,
    /// Measured phase angles, if the sensor measures them.
    pub angle: Option<RealValue<N>>,
    pub variance: f64,
}

/// Power measurement in injection direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSensorCalcParam<const N: usize> {
    pub value: ComplexValue<N>,
    pub p_variance: RealValue<N>,
    pub q_variance: RealValue<N>,
}

impl<const N: usize> PowerSensorCalcParam<N> {
    pub fn new(value: ComplexValue<N>, variance: f64) -> Self {
        Self {
            value,
            p_variance: [variance; N],
            q_variance: [variance; N],
        }
    }
}

/// Measurements ordered by the sensor index pointers of the topology.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateEstimationInput<const N: usize> {
    pub measured_voltage: Vec<VoltageSensorCalcParam<N>>,
    pub measured_source_power: Vec<PowerSensorCalcParam<N>>,
    pub measured_load_gen_power: Vec<PowerSensorCalcParam<N>>,
    pub measured_shunt_power: Vec<PowerSensorCalcParam<N>>,
    pub measured_branch_from_power: Vec<PowerSensorCalcParam<N>>,
    pub measured_branch_to_power: Vec<PowerSensorCalcParam<N>>,
}

/// Fault admittance; an infinite real part is an ideal fault.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultCalcParam {
    pub y_fault: Complex64,
}

impl FaultCalcParam {
    pub fn ideal() -> Self {
        Self {
            y_fault: Complex64::new(f64::INFINITY, f64::INFINITY),
        }
    }

    pub fn is_ideal(&self) -> bool {
        self.y_fault.re.is_infinite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortCircuitInput {
    pub fault_type: FaultType,
    pub fault_phase: FaultPhase,
    pub faults: Vec<FaultCalcParam>,
    /// Per-unit reference voltage of each source, phase a.
    pub source: Vec<Complex64>,
    /// Rated line voltage of the network in volts. Picks the IEC 60909
    /// voltage factor `c` applied to all sources.
    pub u_rated: f64,
}

impl ShortCircuitInput {
    pub fn check(&self, topo: &MathModelTopology) -> Result<()> {
        check_count("source", self.source.len(), topo.n_source())?;
        check_count("fault", self.faults.len(), topo.n_fault())
    }
}
