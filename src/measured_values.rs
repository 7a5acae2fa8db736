//! Aggregated measurements for state estimation.
//!
//! Sensors on the same quantity are merged by inverse-variance weighting.
//! Bus injections are derived from the appliances connected to the bus: a
//! bus without appliances has a zero injection with zero variance, which
//! the solver enforces as an equality constraint.

use num_complex::Complex64;
use std::array::from_fn;

use crate::error::{Result, SolverError};
use crate::params::{PowerSensorCalcParam, StateEstimationInput, VoltageSensorCalcParam};
use crate::solver_output::ApplianceSolverOutput;
use crate::tensor::{unit_angles, zero_value, ComplexValue};
use crate::topology::MathModelTopology;

#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredValues<const N: usize> {
    voltage: Vec<Option<VoltageSensorCalcParam<N>>>,
    bus_injection: Vec<Option<PowerSensorCalcParam<N>>>,
    branch_from: Vec<Option<PowerSensorCalcParam<N>>>,
    branch_to: Vec<Option<PowerSensorCalcParam<N>>>,
    shunt: Vec<Option<PowerSensorCalcParam<N>>>,
    load_gen: Vec<Option<PowerSensorCalcParam<N>>>,
    source: Vec<Option<PowerSensorCalcParam<N>>>,
    has_angle: bool,
    mean_angle_shift: f64,
    angle_ref_bus: usize,
}

fn slice<'a, T>(values: &'a [T], indptr: &[usize], i: usize) -> &'a [T] {
    &values[indptr[i]..indptr[i + 1]]
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(SolverError::InvalidInput {
            what: format!("{} {} measurements given for {} sensors", actual, name, expected),
        });
    }
    Ok(())
}

fn check_variance(name: &str, variance: f64, allow_zero: bool) -> Result<()> {
    let valid = variance.is_finite() && (variance > 0.0 || (allow_zero && variance == 0.0));
    if !valid {
        return Err(SolverError::InvalidMeasurement {
            what: format!("{} sensor has variance {}", name, variance),
        });
    }
    Ok(())
}

/// Inverse-variance combination of one real component. Zero-variance
/// sensors override all others and are averaged.
fn combine_component(values: impl Iterator<Item = (f64, f64)> + Clone) -> (f64, f64) {
    let exact: Vec<f64> = values
        .clone()
        .filter(|&(_, var)| var == 0.0)
        .map(|(v, _)| v)
        .collect();
    if !exact.is_empty() {
        return (exact.iter().sum::<f64>() / exact.len() as f64, 0.0);
    }
    let (weighted, weight) = values.fold((0.0, 0.0), |(s, w), (v, var)| (s + v / var, w + 1.0 / var));
    (weighted / weight, 1.0 / weight)
}

fn combine_power<const N: usize>(
    name: &str,
    sensors: &[PowerSensorCalcParam<N>],
    allow_zero: bool,
) -> Result<Option<PowerSensorCalcParam<N>>> {
    if sensors.is_empty() {
        return Ok(None);
    }
    for s in sensors {
        for p in 0..N {
            check_variance(name, s.p_variance[p], allow_zero)?;
            check_variance(name, s.q_variance[p], allow_zero)?;
        }
    }
    let mut out = PowerSensorCalcParam {
        value: zero_value(),
        p_variance: [0.0; N],
        q_variance: [0.0; N],
    };
    for p in 0..N {
        let (re, p_var) = combine_component(sensors.iter().map(|s| (s.value[p].re, s.p_variance[p])));
        let (im, q_var) = combine_component(sensors.iter().map(|s| (s.value[p].im, s.q_variance[p])));
        out.value[p] = Complex64::new(re, im);
        out.p_variance[p] = p_var;
        out.q_variance[p] = q_var;
    }
    Ok(Some(out))
}

fn combine_voltage<const N: usize>(
    sensors: &[VoltageSensorCalcParam<N>],
) -> Result<Option<VoltageSensorCalcParam<N>>> {
    if sensors.is_empty() {
        return Ok(None);
    }
    for s in sensors {
        check_variance("voltage", s.variance, false)?;
    }
    let weight: f64 = sensors.iter().map(|s| 1.0 / s.variance).sum();
    let variance = 1.0 / weight;
    if sensors.iter().all(|s| s.angle.is_some()) {
        let mut phasor = [Complex64::default(); N];
        for s in sensors {
            let angle = s.angle.unwrap_or([0.0; N]);
            for p in 0..N {
                phasor[p] += Complex64::from_polar(s.magnitude[p], angle[p]) / s.variance;
            }
        }
        let phasor = phasor.map(|z| z * variance);
        return Ok(Some(VoltageSensorCalcParam {
            magnitude: phasor.map(|z| z.norm()),
            angle: Some(phasor.map(|z| z.arg())),
            variance,
        }));
    }
    let magnitude = from_fn(|p| {
        sensors
            .iter()
            .map(|s| s.magnitude[p] / s.variance)
            .sum::<f64>()
            * variance
    });
    Ok(Some(VoltageSensorCalcParam {
        magnitude,
        angle: None,
        variance,
    }))
}

impl<const N: usize> MeasuredValues<N> {
    pub fn new(topo: &MathModelTopology, input: &StateEstimationInput<N>) -> Result<Self> {
        check_len("voltage", input.measured_voltage.len(), topo.n_voltage_sensor())?;
        let power_inputs = [
            ("load_gen", &input.measured_load_gen_power, &topo.power_sensor_load_gen_indptr),
            ("source", &input.measured_source_power, &topo.power_sensor_source_indptr),
            ("shunt", &input.measured_shunt_power, &topo.power_sensor_shunt_indptr),
            ("branch from", &input.measured_branch_from_power, &topo.power_sensor_branch_from_indptr),
            ("branch to", &input.measured_branch_to_power, &topo.power_sensor_branch_to_indptr),
        ];
        for (name, values, indptr) in power_inputs {
            check_len(name, values.len(), indptr.last().copied().unwrap_or(0))?;
        }

        let n_bus = topo.n_bus();
        let voltage = (0..n_bus)
            .map(|bus| combine_voltage(slice(&input.measured_voltage, &topo.voltage_sensor_indptr, bus)))
            .collect::<Result<Vec<_>>>()?;

        let per_element = |name: &str,
                           values: &[PowerSensorCalcParam<N>],
                           indptr: &[usize],
                           allow_zero: bool|
         -> Result<Vec<Option<PowerSensorCalcParam<N>>>> {
            (0..indptr.len() - 1)
                .map(|i| combine_power(name, slice(values, indptr, i), allow_zero))
                .collect()
        };
        let load_gen = per_element(
            "load_gen",
            &input.measured_load_gen_power,
            &topo.power_sensor_load_gen_indptr,
            true,
        )?;
        let source = per_element(
            "source",
            &input.measured_source_power,
            &topo.power_sensor_source_indptr,
            true,
        )?;
        let shunt = per_element(
            "shunt",
            &input.measured_shunt_power,
            &topo.power_sensor_shunt_indptr,
            false,
        )?;
        let mut branch_from = per_element(
            "branch from",
            &input.measured_branch_from_power,
            &topo.power_sensor_branch_from_indptr,
            false,
        )?;
        let mut branch_to = per_element(
            "branch to",
            &input.measured_branch_to_power,
            &topo.power_sensor_branch_to_indptr,
            false,
        )?;
        for (b, sides) in topo.branch_bus_idx.iter().enumerate() {
            if sides[0].is_none() {
                branch_from[b] = None;
            }
            if sides[1].is_none() {
                branch_to[b] = None;
            }
        }

        let bus_injection = (0..n_bus)
            .map(|bus| {
                let appliances: Vec<&Option<PowerSensorCalcParam<N>>> = load_gen[topo.load_gens(bus)]
                    .iter()
                    .chain(&source[topo.sources(bus)])
                    .collect();
                if appliances.is_empty() {
                    return Some(PowerSensorCalcParam::new(zero_value(), 0.0));
                }
                let mut total = PowerSensorCalcParam::new(zero_value(), 0.0);
                for appliance in appliances {
                    let m = appliance.as_ref()?;
                    for p in 0..N {
                        total.value[p] += m.value[p];
                        total.p_variance[p] += m.p_variance[p];
                        total.q_variance[p] += m.q_variance[p];
                    }
                }
                Some(total)
            })
            .collect();

        let offset = unit_angles::<N>();
        let mut shift = Complex64::default();
        for (bus, v) in voltage.iter().enumerate() {
            if let Some(angle) = v.as_ref().and_then(|v| v.angle) {
                for p in 0..N {
                    shift += Complex64::from_polar(1.0, angle[p] - offset[p] - topo.phase_shift[bus]);
                }
            }
        }
        let has_angle = voltage
            .iter()
            .any(|v| v.as_ref().is_some_and(|v| v.angle.is_some()));
        let mean_angle_shift = if has_angle { shift.arg() } else { 0.0 };
        let angle_ref_bus = if voltage[topo.slack_bus].is_some() {
            topo.slack_bus
        } else {
            voltage.iter().position(|v| v.is_some()).unwrap_or(topo.slack_bus)
        };

        Ok(Self {
            voltage,
            bus_injection,
            branch_from,
            branch_to,
            shunt,
            load_gen,
            source,
            has_angle,
            mean_angle_shift,
            angle_ref_bus,
        })
    }

    pub fn voltage(&self, bus: usize) -> Option<&VoltageSensorCalcParam<N>> {
        self.voltage[bus].as_ref()
    }

    pub fn bus_injection(&self, bus: usize) -> Option<&PowerSensorCalcParam<N>> {
        self.bus_injection[bus].as_ref()
    }

    pub fn branch_from_power(&self, branch: usize) -> Option<&PowerSensorCalcParam<N>> {
        self.branch_from[branch].as_ref()
    }

    pub fn branch_to_power(&self, branch: usize) -> Option<&PowerSensorCalcParam<N>> {
        self.branch_to[branch].as_ref()
    }

    pub fn shunt_power(&self, shunt: usize) -> Option<&PowerSensorCalcParam<N>> {
        self.shunt[shunt].as_ref()
    }

    pub fn load_gen_power(&self, load_gen: usize) -> Option<&PowerSensorCalcParam<N>> {
        self.load_gen[load_gen].as_ref()
    }

    pub fn source_power(&self, source: usize) -> Option<&PowerSensorCalcParam<N>> {
        self.source[source].as_ref()
    }

    /// Whether any bus has a measured voltage angle.
    pub fn has_angle(&self) -> bool {
        self.has_angle
    }

    /// Mean of the measured angles relative to the phase shift of their bus.
    pub fn mean_angle_shift(&self) -> f64 {
        self.mean_angle_shift
    }

    /// Bus whose angle is held at its initial value when no angle is measured.
    pub fn angle_ref_bus(&self) -> usize {
        self.angle_ref_bus
    }

    /// Splits the solved injection of every bus over its load/generators and
    /// sources.
    ///
    /// Unmeasured appliances share whatever the measured ones leave. When all
    /// are measured, the mismatch is spread in proportion to their variance.
    pub fn calculate_load_gen_source(
        &self,
        topo: &MathModelTopology,
        u: &[ComplexValue<N>],
        s_bus: &[ComplexValue<N>],
    ) -> (Vec<ApplianceSolverOutput<N>>, Vec<ApplianceSolverOutput<N>>) {
        let mut load_gen = vec![ApplianceSolverOutput::default(); topo.n_load_gen()];
        let mut source = vec![ApplianceSolverOutput::default(); topo.n_source()];
        for bus in 0..topo.n_bus() {
            let lg = topo.load_gens(bus);
            let src = topo.sources(bus);
            let measured: Vec<Option<&PowerSensorCalcParam<N>>> = lg
                .clone()
                .map(|i| self.load_gen_power(i))
                .chain(src.clone().map(|i| self.source_power(i)))
                .collect();
            if measured.is_empty() {
                continue;
            }
            let s = distribute(&measured, &s_bus[bus]);
            let out = |s: ComplexValue<N>| ApplianceSolverOutput {
                i: from_fn(|p| (s[p] / u[bus][p]).conj()),
                s,
            };
            for (k, i) in lg.clone().enumerate() {
                load_gen[i] = out(s[k]);
            }
            for (k, i) in src.enumerate() {
                source[i] = out(s[lg.len() + k]);
            }
        }
        (load_gen, source)
    }
}

fn distribute<const N: usize>(
    measured: &[Option<&PowerSensorCalcParam<N>>],
    s_bus: &ComplexValue<N>,
) -> Vec<ComplexValue<N>> {
    let mut out = vec![zero_value::<N>(); measured.len()];
    for p in 0..N {
        let re = distribute_component(
            measured.iter().map(|m| m.map(|m| (m.value[p].re, m.p_variance[p]))),
            s_bus[p].re,
        );
        let im = distribute_component(
            measured.iter().map(|m| m.map(|m| (m.value[p].im, m.q_variance[p]))),
            s_bus[p].im,
        );
        for (k, (re, im)) in re.into_iter().zip(im).enumerate() {
            out[k][p] = Complex64::new(re, im);
        }
    }
    out
}

fn distribute_component(measured: impl Iterator<Item = Option<(f64, f64)>>, total: f64) -> Vec<f64> {
    let measured: Vec<Option<(f64, f64)>> = measured.collect();
    let n_unmeasured = measured.iter().filter(|m| m.is_none()).count();
    let measured_sum: f64 = measured.iter().flatten().map(|(v, _)| v).sum();
    let mismatch = total - measured_sum;
    if n_unmeasured > 0 {
        let share = mismatch / n_unmeasured as f64;
        return measured.iter().map(|m| m.map_or(share, |(v, _)| v)).collect();
    }
    let var_sum: f64 = measured.iter().flatten().map(|(_, var)| var).sum();
    let n = measured.len() as f64;
    measured
        .iter()
        .flatten()
        .map(|&(v, var)| {
            if var_sum > 0.0 {
                v + mismatch * var / var_sum
            } else {
                v + mismatch / n
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::topology::{LoadGenType, MeasuredTerminalType};

    fn topo() -> MathModelTopology {
        let mut topo = MathModelTopology::new(3);
        topo.push_source(0);
        topo.push_load_gen(1, LoadGenType::ConstPq);
        topo.push_load_gen(1, LoadGenType::ConstPq);
        topo.push_branch(Some(0), Some(1));
        topo.push_branch(Some(1), Some(2));
        topo.push_voltage_sensor(0);
        topo.push_voltage_sensor(0);
        topo.push_voltage_sensor(1);
        topo.push_power_sensor(MeasuredTerminalType::LoadGen, 0);
        topo.push_power_sensor(MeasuredTerminalType::LoadGen, 1);
        topo.push_power_sensor(MeasuredTerminalType::LoadGen, 1);
        topo
    }

    fn voltage(m: f64, angle: Option<f64>, variance: f64) -> VoltageSensorCalcParam<1> {
        VoltageSensorCalcParam {
            magnitude: [m],
            angle: angle.map(|a| [a]),
            variance,
        }
    }

    fn input() -> StateEstimationInput<1> {
        StateEstimationInput {
            measured_voltage: vec![
                voltage(1.0, Some(0.0), 1.0),
                voltage(1.1, Some(0.0), 1.0),
                voltage(0.98, None, 0.5),
            ],
            measured_load_gen_power: vec![
                PowerSensorCalcParam::new([cmplx!(-1.0, -0.5)], 0.1),
                PowerSensorCalcParam::new([cmplx!(-2.0, -1.0)], 1.0),
                PowerSensorCalcParam::new([cmplx!(-4.0, -1.0)], 1.0),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn combines_sensors() {
        let mv = MeasuredValues::new(&topo(), &input()).unwrap();
        let v0 = mv.voltage(0).unwrap();
        assert!((v0.magnitude[0] - 1.05).abs() < 1e-12);
        assert_eq!(v0.variance, 0.5);
        assert!(v0.angle.is_some());
        assert!(mv.voltage(1).unwrap().angle.is_none());
        assert!(mv.voltage(2).is_none());
        assert!(mv.has_angle());
        assert!(mv.mean_angle_shift().abs() < 1e-12);

        let lg1 = mv.load_gen_power(1).unwrap();
        assert!((lg1.value[0] - cmplx!(-3.0, -1.0)).norm() < 1e-12);
        assert_eq!(lg1.p_variance[0], 0.5);

        // source at bus 0 is not measured, bus 2 has no appliances
        assert!(mv.bus_injection(0).is_none());
        let inj1 = mv.bus_injection(1).unwrap();
        assert!((inj1.value[0] - cmplx!(-4.0, -1.5)).norm() < 1e-12);
        assert!((inj1.p_variance[0] - 0.6).abs() < 1e-12);
        let inj2 = mv.bus_injection(2).unwrap();
        assert_eq!(inj2.p_variance[0], 0.0);
        assert_eq!(inj2.value[0], cmplx!());
    }

    #[test]
    fn rejects_zero_voltage_variance() {
        let mut input = input();
        input.measured_voltage[2].variance = 0.0;
        assert!(matches!(
            MeasuredValues::new(&topo(), &input),
            Err(SolverError::InvalidMeasurement { .. })
        ));
        let mut input = self::input();
        input.measured_load_gen_power.pop();
        assert!(matches!(
            MeasuredValues::new(&topo(), &input),
            Err(SolverError::InvalidInput { .. })
        ));
    }

    #[test]
    fn distributes_injection() {
        let topo = topo();
        let mv = MeasuredValues::new(&topo, &input()).unwrap();
        let u = vec![[cmplx!(1.0)]; 3];
        let s_bus = vec![[cmplx!(0.5, 0.2)], [cmplx!(-4.6, -1.5)], [cmplx!()]];
        let (load_gen, source) = mv.calculate_load_gen_source(&topo, &u, &s_bus);
        // unmeasured source takes the full injection
        assert!((source[0].s[0] - cmplx!(0.5, 0.2)).norm() < 1e-12);
        // measured loads share the mismatch of -0.6 by variance 0.1 : 0.5
        assert!((load_gen[0].s[0].re - (-1.0 - 0.1)).abs() < 1e-12);
        assert!((load_gen[1].s[0].re - (-3.0 - 0.5)).abs() < 1e-12);
        assert!((load_gen[1].i[0] - cmplx!(-3.5, 1.0)).norm() < 1e-12);
    }
}
