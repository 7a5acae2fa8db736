//! Newton-Raphson state estimation.
//!
//! Weighted least squares over voltage, branch and shunt measurements. Bus
//! injections enter through Lagrange multipliers so that zero injections
//! hold exactly. Per bus the unknown is `[theta, v, phi_p, phi_q]` and each
//! entry of the gain matrix is a `4N x 4N` block
//!
//! ```text
//! [ G   QT ] [ dx  ]   [ eta ]
//! [ Q   R  ] [ phi ] = [ tau ]
//! ```
//!
//! where `G` collects `F^T W F` of the measurements, `Q` is the Jacobian of
//! the bus injection, `R` holds the negated injection variances and `tau`
//! the injection residual. Buses without an injection measurement get
//! `R = -I` and `tau = 0`, which forces their multiplier to zero.

use num_complex::Complex64;
use std::array::from_fn;
use std::sync::Arc;

use crate::debug::format_polar_vec;
use crate::error::{Result, SolverError};
use crate::math::wrap_angle;
use crate::measured_values::MeasuredValues;
use crate::params::{BranchCalcParam, PowerSensorCalcParam, StateEstimationInput};
use crate::solver_output::SolverOutput;
use crate::sparse_lu::SparseLuSolver;
use crate::tensor::{
    add_value, cabs, diag_jacobian, hm_complex_form, max_deviation, sum_row, unit_angles,
    zero_value, ComplexValue, QuadBlock, RealValue,
};
use crate::timer::{record_iterations, CalculationInfo, Timer};
use crate::topology::MathModelTopology;
use crate::ybus::{YBus, YBusElementType, YBusStructure};

/// One `4N x 4N` block of the gain matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GainBlock<const N: usize> {
    pub g: QuadBlock<N>,
    pub qt: QuadBlock<N>,
    pub q: QuadBlock<N>,
    pub r: QuadBlock<N>,
}

impl<const N: usize> GainBlock<N> {
    fn write(&self, out: &mut [f64]) {
        let stride = 4 * N;
        self.g.write(out, stride, 0, 0);
        self.qt.write(out, stride, 0, 2 * N);
        self.q.write(out, stride, 2 * N, 0);
        self.r.write(out, stride, 2 * N, 2 * N);
    }
}

#[derive(Debug, Clone, Copy)]
struct SeUnknown<const N: usize> {
    theta: RealValue<N>,
    v: RealValue<N>,
    phi_p: RealValue<N>,
    phi_q: RealValue<N>,
}

/// Calculated power at both sides of a branch and its derivatives.
struct BranchJacobian<const N: usize> {
    s: [ComplexValue<N>; 2],
    /// `f[m][k]`: power at side `m` with respect to the voltage at side `k`.
    f: [[QuadBlock<N>; 2]; 2],
}

fn branch_jacobian<const N: usize>(
    param: &BranchCalcParam<N>,
    sides: &[Option<usize>; 2],
    u: &[ComplexValue<N>],
) -> BranchJacobian<N> {
    let y = [[&param.yff, &param.yft], [&param.ytf, &param.ytt]];
    let mut out = BranchJacobian {
        s: [zero_value(); 2],
        f: [[QuadBlock::default(); 2]; 2],
    };
    for m in 0..2 {
        let Some(bus_m) = sides[m] else { continue };
        let o = 1 - m;
        let u_m = &u[bus_m];
        let h_mm = hm_complex_form(y[m][m], u_m, u_m);
        let mut s = sum_row(&h_mm);
        if let Some(bus_o) = sides[o] {
            let h_mo = hm_complex_form(y[m][o], u_m, &u[bus_o]);
            add_value(&mut s, &sum_row(&h_mo));
            out.f[m][o] = QuadBlock::from_hm(&h_mo, &cabs(&u[bus_o]));
        }
        out.f[m][m] = diag_jacobian(&h_mm, &s, &cabs(u_m));
        out.s[m] = s;
    }
    out
}

fn weights<const N: usize>(m: &PowerSensorCalcParam<N>) -> (RealValue<N>, RealValue<N>) {
    (
        m.p_variance.map(|v| 1.0 / v),
        m.q_variance.map(|v| 1.0 / v),
    )
}

/// Adds `F^T W (z - s)` to the state rows of a bus.
fn add_measurement_rhs<const N: usize>(
    rhs: &mut [f64],
    f: &QuadBlock<N>,
    m: &PowerSensorCalcParam<N>,
    s: &ComplexValue<N>,
) {
    let (w_p, w_q) = weights(m);
    let r_p = from_fn(|p| m.value[p].re - s[p].re);
    let r_q = from_fn(|p| m.value[p].im - s[p].im);
    let (upper, lower) = f.weighted_tvec(&w_p, &w_q, &r_p, &r_q);
    for p in 0..N {
        rhs[p] += upper[p];
        rhs[N + p] += lower[p];
    }
}

#[derive(Debug, Clone)]
pub struct NewtonRaphsonSeSolver<const N: usize> {
    n_bus: usize,
    topo: Arc<MathModelTopology>,
    structure: Arc<YBusStructure>,
    data_gain: Vec<GainBlock<N>>,
    gain_flat: Vec<f64>,
    rhs: Vec<f64>,
    delta: Vec<f64>,
    x: Vec<SeUnknown<N>>,
    u: Vec<ComplexValue<N>>,
    sparse_solver: SparseLuSolver<f64>,
}

impl<const N: usize> NewtonRaphsonSeSolver<N> {
    const BLOCK: usize = 4 * N;

    pub fn new(y_bus: &YBus<N>) -> Self {
        let n_bus = y_bus.size();
        let nnz_lu = y_bus.structure().nnz_lu();
        let bs = Self::BLOCK;
        Self {
            n_bus,
            topo: Arc::clone(y_bus.shared_topology()),
            structure: Arc::clone(y_bus.structure()),
            data_gain: vec![GainBlock::default(); nnz_lu],
            gain_flat: vec![0.0; nnz_lu * bs * bs],
            rhs: vec![0.0; n_bus * bs],
            delta: vec![0.0; n_bus * bs],
            x: vec![
                SeUnknown {
                    theta: [0.0; N],
                    v: [1.0; N],
                    phi_p: [0.0; N],
                    phi_q: [0.0; N],
                };
                n_bus
            ],
            u: vec![zero_value(); n_bus],
            sparse_solver: SparseLuSolver::new(Arc::clone(y_bus.lu_pattern()), bs),
        }
    }

    /// Gain blocks of the last assembled system, in LU pattern order.
    pub fn gain_blocks(&self) -> &[GainBlock<N>] {
        &self.data_gain
    }

    pub fn run_state_estimation(
        &mut self,
        y_bus: &YBus<N>,
        input: &StateEstimationInput<N>,
        err_tol: f64,
        max_iter: usize,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        let timer = Timer::start(2221, "Pre-process measured value");
        let measured = MeasuredValues::new(&self.topo, input)?;
        self.initialize_unknown(&measured);
        timer.stop(info);
        log::debug!("initial voltage: {}", format_polar_vec(&self.u));

        let mut num_iter = 0;
        let mut max_dev = f64::INFINITY;
        while max_dev.is_nan() || max_dev > err_tol || num_iter == 0 {
            if num_iter == max_iter {
                record_iterations(info, num_iter);
                return Err(SolverError::IterationDiverge {
                    num_iter,
                    max_dev: if max_dev.is_nan() { f64::INFINITY } else { max_dev },
                    err_tol,
                });
            }
            num_iter += 1;

            let timer = Timer::start(2222, "Prepare matrix");
            self.prepare_matrix_and_rhs(y_bus, &measured);
            timer.stop(info);

            let timer = Timer::start(2223, "Solve sparse linear equation");
            let result = self
                .sparse_solver
                .prefactorize(&self.gain_flat)
                .and_then(|_| self.sparse_solver.solve_with_prefactorized(&self.rhs, &mut self.delta));
            timer.stop(info);
            result?;

            let timer = Timer::start(2224, "Iterate unknown");
            max_dev = self.iterate_unknown(&measured);
            timer.stop(info);
            log::debug!("state estimation iteration {}: max deviation {:e}", num_iter, max_dev);
        }
        record_iterations(info, num_iter);
        log::trace!("estimated voltage: {}", format_polar_vec(&self.u));

        let timer = Timer::start(2225, "Calculate math result");
        let output = self.calculate_result(y_bus, &measured);
        timer.stop(info);
        Ok(output)
    }

    fn initialize_unknown(&mut self, measured: &MeasuredValues<N>) {
        let offset = unit_angles::<N>();
        for bus in 0..self.n_bus {
            let shift = measured.mean_angle_shift() + self.topo.phase_shift[bus];
            let voltage = measured.voltage(bus);
            let x = &mut self.x[bus];
            x.theta = voltage
                .and_then(|v| v.angle)
                .unwrap_or_else(|| from_fn(|p| shift + offset[p]));
            x.v = voltage.map_or([1.0; N], |v| v.magnitude);
            x.phi_p = [0.0; N];
            x.phi_q = [0.0; N];
            self.u[bus] = from_fn(|p| Complex64::from_polar(x.v[p], x.theta[p]));
        }
    }

    fn prepare_matrix_and_rhs(&mut self, y_bus: &YBus<N>, measured: &MeasuredValues<N>) {
        let structure = Arc::clone(&self.structure);
        let lu = &structure.lu;
        let param = y_bus.math_model_param();
        let admittance = y_bus.admittance();
        let u = &self.u;
        let bs = Self::BLOCK;

        let branch_jac: Vec<Option<BranchJacobian<N>>> = self
            .topo
            .branch_bus_idx
            .iter()
            .enumerate()
            .map(|(b, sides)| {
                let has_measurement =
                    measured.branch_from_power(b).is_some() || measured.branch_to_power(b).is_some();
                has_measurement.then(|| branch_jacobian(&param.branch_param[b], sides, u))
            })
            .collect();

        for row in 0..self.n_bus {
            let row_range = lu.row_indptr[row]..lu.row_indptr[row + 1];
            let u_row_abs = cabs(&u[row]);
            let mut s_inj = zero_value::<N>();
            for pos in row_range.clone() {
                if let Some(y) = y_bus.admittance_lu(pos) {
                    add_value(&mut s_inj, &sum_row(&hm_complex_form(y, &u[row], &u[lu.col_indices[pos]])));
                }
            }
            let injection = measured.bus_injection(row);
            let rhs = &mut self.rhs[row * bs..(row + 1) * bs];
            rhs.fill(0.0);

            for pos in row_range {
                let col = lu.col_indices[pos];
                let block = &mut self.data_gain[pos];
                *block = GainBlock::default();
                let Some(entry) = structure.map_lu_y_bus[pos] else {
                    continue;
                };

                for element in structure.elements(entry) {
                    let (row_side, col_side) = match element.element_type {
                        YBusElementType::Shunt => {
                            let Some(m) = measured.shunt_power(element.idx) else {
                                continue;
                            };
                            let h = hm_complex_form(&param.shunt_param[element.idx], &u[row], &u[row]);
                            let s = sum_row(&h);
                            let f = diag_jacobian(&h, &s, &u_row_abs).neg();
                            let (w_p, w_q) = weights(m);
                            block.g.add(&f.weighted_tmul(&w_p, &w_q, &f));
                            add_measurement_rhs(rhs, &f, m, &s.map(|z| -z));
                            continue;
                        }
                        YBusElementType::Bff => (0, 0),
                        YBusElementType::Bft => (0, 1),
                        YBusElementType::Btf => (1, 0),
                        YBusElementType::Btt => (1, 1),
                    };
                    let Some(jac) = &branch_jac[element.idx] else {
                        continue;
                    };
                    let sides = [
                        measured.branch_from_power(element.idx),
                        measured.branch_to_power(element.idx),
                    ];
                    for (side, m) in sides.into_iter().enumerate() {
                        let Some(m) = m else { continue };
                        let f_row = &jac.f[side][row_side];
                        let (w_p, w_q) = weights(m);
                        block.g.add(&f_row.weighted_tmul(&w_p, &w_q, &jac.f[side][col_side]));
                        if row == col {
                            add_measurement_rhs(rhs, f_row, m, &jac.s[side]);
                        }
                    }
                }

                if injection.is_some() {
                    let h = hm_complex_form(&admittance[entry], &u[row], &u[col]);
                    block.q = if row == col {
                        diag_jacobian(&h, &s_inj, &u_row_abs)
                    } else {
                        QuadBlock::from_hm(&h, &cabs(&u[col]))
                    };
                }

                if row != col {
                    continue;
                }
                let x = &self.x[row];
                if let Some(v) = measured.voltage(row) {
                    let w_v = 1.0 / v.variance;
                    for p in 0..N {
                        block.g.lr[p][p] += w_v;
                        rhs[N + p] += w_v * (v.magnitude[p] - x.v[p]);
                    }
                    if let Some(angle) = v.angle {
                        for p in 0..N {
                            block.g.ul[p][p] += 1.0;
                            rhs[p] += wrap_angle(angle[p] - x.theta[p]);
                        }
                    }
                }
                if !measured.has_angle() && row == measured.angle_ref_bus() {
                    // virtual angle measurement at the reference angle of the bus
                    let offset = unit_angles::<N>();
                    for p in 0..N {
                        block.g.ul[p][p] += 1.0;
                        rhs[p] += wrap_angle(offset[p] + self.topo.phase_shift[row] - x.theta[p]);
                    }
                }
                for p in 0..N {
                    match injection {
                        Some(inj) => {
                            block.r.ul[p][p] = -inj.p_variance[p];
                            block.r.lr[p][p] = -inj.q_variance[p];
                            rhs[2 * N + p] = inj.value[p].re - s_inj[p].re;
                            rhs[3 * N + p] = inj.value[p].im - s_inj[p].im;
                        }
                        None => {
                            block.r.ul[p][p] = -1.0;
                            block.r.lr[p][p] = -1.0;
                        }
                    }
                }
            }
        }

        self.make_symmetric_from_lower_triangle();

        // the state rows carry the full multiplier, solve for its increment
        for row in 0..self.n_bus {
            for pos in lu.row_indptr[row]..lu.row_indptr[row + 1] {
                let phi = &self.x[lu.col_indices[pos]];
                if phi.phi_p.iter().chain(&phi.phi_q).all(|&f| f == 0.0) {
                    continue;
                }
                let q = &self.data_gain[lu.transpose_entry[pos]].q;
                let (upper, lower) = q.weighted_tvec(&[1.0; N], &[1.0; N], &phi.phi_p, &phi.phi_q);
                let rhs = &mut self.rhs[row * bs..(row + 1) * bs];
                for p in 0..N {
                    rhs[p] -= upper[p];
                    rhs[N + p] -= lower[p];
                }
            }
        }

        for (pos, block) in self.data_gain.iter().enumerate() {
            block.write(&mut self.gain_flat[pos * bs * bs..(pos + 1) * bs * bs]);
        }
    }

    /// Fills `QT` of every block with the transposed `Q` of its mirror entry.
    fn make_symmetric_from_lower_triangle(&mut self) {
        let lu = &self.structure.lu;
        for pos in 0..self.data_gain.len() {
            self.data_gain[pos].qt = self.data_gain[lu.transpose_entry[pos]].q.transpose();
        }
    }

    fn iterate_unknown(&mut self, measured: &MeasuredValues<N>) -> f64 {
        let bs = Self::BLOCK;
        let slack = self.topo.slack_bus;
        let slack_dtheta = if measured.has_angle() {
            0.0
        } else {
            self.delta[slack * bs]
        };
        let mut max_dev: f64 = 0.0;
        for bus in 0..self.n_bus {
            let d = &self.delta[bus * bs..(bus + 1) * bs];
            let x = &mut self.x[bus];
            for p in 0..N {
                x.theta[p] += d[p] - slack_dtheta;
                x.v[p] += d[N + p];
            }
            if let Some(inj) = measured.bus_injection(bus) {
                for p in 0..N {
                    if inj.p_variance[p] == 0.0 {
                        x.phi_p[p] += d[2 * N + p];
                    }
                    if inj.q_variance[p] == 0.0 {
                        x.phi_q[p] += d[3 * N + p];
                    }
                }
            }
            let u_new = from_fn(|p| Complex64::from_polar(x.v[p], x.theta[p]));
            let dev = max_deviation(&u_new, &self.u[bus]);
            if dev.is_nan() || dev > max_dev {
                max_dev = dev;
            }
            self.u[bus] = u_new;
        }
        max_dev
    }

    fn calculate_result(&self, y_bus: &YBus<N>, measured: &MeasuredValues<N>) -> SolverOutput<N> {
        let bus_injection = y_bus.calculate_injection(&self.u);
        let (load_gen, source) = measured.calculate_load_gen_source(&self.topo, &self.u, &bus_injection);
        SolverOutput {
            u: self.u.clone(),
            branch: y_bus.calculate_branch_flow(&self.u),
            shunt: y_bus.calculate_shunt_flow(&self.u),
            bus_injection,
            load_gen,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::params::{MathModelParam, SourceCalcParam, VoltageSensorCalcParam};
    use crate::topology::MeasuredTerminalType;
    use crate::tests::init_logging;
    use anyhow::{format_err, Result};

    /// Source bus 0 with a phasor measurement, bus 1 without appliances
    /// measured at 0.95.
    fn two_bus() -> (YBus<1>, StateEstimationInput<1>) {
        let mut topo = MathModelTopology::new(2);
        topo.push_source(0);
        topo.push_branch(Some(0), Some(1));
        topo.push_voltage_sensor(0);
        topo.push_voltage_sensor(1);
        let param = MathModelParam {
            branch_param: vec![BranchCalcParam::pi_model(cmplx!(10.0, -5.0), cmplx!())],
            shunt_param: vec![],
            source_param: vec![SourceCalcParam::from_sequence(cmplx!(1e3), cmplx!(1e3))],
        };
        let input = StateEstimationInput {
            measured_voltage: vec![
                VoltageSensorCalcParam {
                    magnitude: [1.0],
                    angle: Some([0.0]),
                    variance: 1.0,
                },
                VoltageSensorCalcParam {
                    magnitude: [0.95],
                    angle: None,
                    variance: 1e-6,
                },
            ],
            ..Default::default()
        };
        let y_bus = YBus::new(Arc::new(topo), Arc::new(param)).unwrap();
        (y_bus, input)
    }

    #[test]
    fn zero_injection_forces_equal_voltage() -> Result<()> {
        init_logging();
        let (y_bus, input) = two_bus();
        let mut solver = NewtonRaphsonSeSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let output = solver
            .run_state_estimation(&y_bus, &input, 1e-10, 10, &mut info)
            .map_err(|e| format_err!("{}", e))?;

        let (u0, u1) = (output.u[0][0], output.u[1][0]);
        assert!((u0 - u1).norm() < 1e-8, "u0 = {}, u1 = {}", u0, u1);
        assert!((u0.norm() - 0.95).abs() < 1e-6);
        // bus 1 has no appliances: its injection is exactly zero
        assert!(output.bus_injection[1][0].norm() < 1e-8);
        assert!(info[crate::timer::KEY_MAX_ITERATIONS] <= 10.0);
        assert!(info.contains_key("2222.Prepare matrix"));
        Ok(())
    }

    #[test]
    fn coupling_blocks_are_transposed() {
        let (y_bus, input) = two_bus();
        let mut solver = NewtonRaphsonSeSolver::new(&y_bus);
        let measured = MeasuredValues::new(y_bus.shared_topology(), &input).unwrap();
        solver.initialize_unknown(&measured);
        solver.prepare_matrix_and_rhs(&y_bus, &measured);

        let lu = &y_bus.structure().lu;
        let blocks = solver.gain_blocks();
        for pos in 0..blocks.len() {
            assert_eq!(blocks[pos].qt, blocks[lu.transpose_entry[pos]].q.transpose());
        }
        // bus 0 has no injection measurement
        let d0 = &blocks[lu.diag[0]];
        assert_eq!(d0.q, QuadBlock::default());
        assert_eq!(d0.r.ul[0][0], -1.0);
        // bus 1 constrains both neighbours
        assert_ne!(blocks[lu.find(1, 0).unwrap()].q, QuadBlock::default());
        assert_eq!(blocks[lu.diag[1]].r.ul[0][0], 0.0);
    }

    /// One bus with a source and a lossy shunt. The source P sensor is
    /// exact and asks the bus to absorb power, which the shunt can only do
    /// at a negative `|u|^2`.
    fn unsatisfiable() -> (YBus<1>, StateEstimationInput<1>) {
        let mut topo = MathModelTopology::new(1);
        topo.push_source(0);
        topo.push_shunt(0);
        topo.push_voltage_sensor(0);
        topo.push_power_sensor(MeasuredTerminalType::Source, 0);
        let param = MathModelParam {
            branch_param: vec![],
            shunt_param: vec![crate::tensor::diag_tensor(cmplx!(2.0, -1.0))],
            source_param: vec![SourceCalcParam::from_sequence(cmplx!(1e3), cmplx!(1e3))],
        };
        let input = StateEstimationInput {
            measured_voltage: vec![VoltageSensorCalcParam {
                magnitude: [1.0],
                angle: Some([0.0]),
                variance: 1.0,
            }],
            measured_source_power: vec![PowerSensorCalcParam {
                value: [cmplx!(-1.0, 0.5)],
                p_variance: [0.0],
                q_variance: [1.0],
            }],
            ..Default::default()
        };
        let y_bus = YBus::new(Arc::new(topo), Arc::new(param)).unwrap();
        (y_bus, input)
    }

    #[test]
    fn unsatisfiable_constraint_diverges() {
        init_logging();
        let (y_bus, input) = unsatisfiable();
        let mut solver = NewtonRaphsonSeSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let err = solver
            .run_state_estimation(&y_bus, &input, 1e-8, 20, &mut info)
            .unwrap_err();
        match err {
            SolverError::IterationDiverge { num_iter, max_dev, err_tol } => {
                assert_eq!(num_iter, 20);
                assert_eq!(err_tol, 1e-8);
                // every step of the exact P row moves |u| by at least 1/sqrt(2)
                assert!(max_dev > 0.5, "max_dev = {}", max_dev);
            }
            e => panic!("unexpected error {}", e),
        }
        assert_eq!(info[crate::timer::KEY_MAX_ITERATIONS], 20.0);
    }

    #[test]
    fn exact_voltage_sensors_are_rejected() {
        let (y_bus, _) = unsatisfiable();
        let mut topo = (**y_bus.shared_topology()).clone();
        topo.push_voltage_sensor(0);
        let y_bus = YBus::new(Arc::new(topo), Arc::new(y_bus.math_model_param().clone())).unwrap();
        let exact = |magnitude| VoltageSensorCalcParam {
            magnitude: [magnitude],
            angle: None,
            variance: 0.0,
        };
        let input = StateEstimationInput {
            measured_voltage: vec![exact(0.95), exact(1.05)],
            measured_source_power: vec![PowerSensorCalcParam::new([cmplx!()], 1.0)],
            ..Default::default()
        };
        let mut solver = NewtonRaphsonSeSolver::new(&y_bus);
        assert!(matches!(
            solver.run_state_estimation(&y_bus, &input, 1e-8, 20, &mut CalculationInfo::new()),
            Err(SolverError::InvalidMeasurement { .. })
        ));
    }

    #[test]
    fn virtual_angle_pulls_reference_back() {
        let (y_bus, mut input) = two_bus();
        input.measured_voltage[0].angle = None;
        let mut solver = NewtonRaphsonSeSolver::new(&y_bus);
        let measured = MeasuredValues::new(y_bus.shared_topology(), &input).unwrap();
        assert!(!measured.has_angle());
        solver.initialize_unknown(&measured);
        solver.prepare_matrix_and_rhs(&y_bus, &measured);
        assert_eq!(solver.rhs[0], 0.0);

        solver.x[0].theta = [0.1];
        solver.prepare_matrix_and_rhs(&y_bus, &measured);
        let lu = &y_bus.structure().lu;
        assert_eq!(solver.gain_blocks()[lu.diag[0]].g.ul[0][0], 1.0);
        assert!((solver.rhs[0] + 0.1).abs() < 1e-15);
    }

    #[test]
    fn magnitude_only_keeps_reference_angle() -> Result<()> {
        let (y_bus, mut input) = two_bus();
        input.measured_voltage[0].angle = None;
        let mut solver = NewtonRaphsonSeSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let output = solver
            .run_state_estimation(&y_bus, &input, 1e-10, 20, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        assert!(output.u[0][0].arg().abs() < 1e-8);
        assert!((output.u[0][0] - output.u[1][0]).norm() < 1e-8);
        Ok(())
    }
}
