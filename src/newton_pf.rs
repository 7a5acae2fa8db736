//! Newton-Raphson power flow in polar coordinates.
//!
//! Every bus is a PQ bus; sources are Thevenin equivalents whose internal
//! admittance is part of the calculated power. Each Jacobian entry is a
//! `2N x 2N` block with rows `(P, Q)` and columns `(theta, v)`.

use num_complex::Complex64;
use std::array::from_fn;
use std::sync::Arc;

use crate::debug::{format_polar_vec, format_rect_vec};
use crate::error::{Result, SolverError};
use crate::params::PowerFlowInput;
use crate::solver_output::{calculate_pf_result, SolverOutput};
use crate::sparse_lu::SparseLuSolver;
use crate::tensor::{
    add_value, cabs, diag_jacobian, hm_complex_form, max_deviation, phasor, sum_row, unit_angles,
    zero_value, ComplexValue, QuadBlock, RealValue,
};
use crate::timer::{record_iterations, CalculationInfo, Timer};
use crate::topology::{LoadGenType, MathModelTopology};
use crate::ybus::YBus;

#[derive(Debug, Clone, Copy)]
struct PolarUnknown<const N: usize> {
    theta: RealValue<N>,
    v: RealValue<N>,
}

/// Mean of the source reference voltages, `1.0` without sources.
pub(crate) fn mean_source_voltage(source: &[Complex64]) -> Complex64 {
    if source.is_empty() {
        return Complex64::new(1.0, 0.0);
    }
    source.iter().sum::<Complex64>() / source.len() as f64
}

/// Source voltage of all phases with the bus phase shift applied.
pub(crate) fn source_phasor<const N: usize>(u_ref: Complex64, phase_shift: f64) -> ComplexValue<N> {
    phasor(u_ref.norm(), u_ref.arg() + phase_shift)
}

#[derive(Debug, Clone)]
pub struct NewtonRaphsonPfSolver<const N: usize> {
    n_bus: usize,
    topo: Arc<MathModelTopology>,
    data_jac: Vec<QuadBlock<N>>,
    jac_flat: Vec<f64>,
    del_pq: Vec<f64>,
    delta: Vec<f64>,
    x: Vec<PolarUnknown<N>>,
    u: Vec<ComplexValue<N>>,
    sparse_solver: SparseLuSolver<f64>,
}

impl<const N: usize> NewtonRaphsonPfSolver<N> {
    const BLOCK: usize = 2 * N;

    pub fn new(y_bus: &YBus<N>) -> Self {
        let n_bus = y_bus.size();
        let nnz_lu = y_bus.structure().nnz_lu();
        let bs = Self::BLOCK;
        Self {
            n_bus,
            topo: Arc::clone(y_bus.shared_topology()),
            data_jac: vec![QuadBlock::default(); nnz_lu],
            jac_flat: vec![0.0; nnz_lu * bs * bs],
            del_pq: vec![0.0; n_bus * bs],
            delta: vec![0.0; n_bus * bs],
            x: vec![
                PolarUnknown {
                    theta: [0.0; N],
                    v: [1.0; N],
                };
                n_bus
            ],
            u: vec![zero_value(); n_bus],
            sparse_solver: SparseLuSolver::new(Arc::clone(y_bus.lu_pattern()), bs),
        }
    }

    pub fn run_power_flow(
        &mut self,
        y_bus: &YBus<N>,
        input: &PowerFlowInput<N>,
        err_tol: f64,
        max_iter: usize,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        input.check(&self.topo)?;

        let timer = Timer::start(2211, "Initialize calculation");
        self.initialize_unknown(input);
        timer.stop(info);
        log::debug!("V0: {}", format_polar_vec(&self.u));

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

            let timer = Timer::start(2212, "Calculate jacobian and rhs");
            self.prepare_matrix_and_rhs(y_bus, input);
            timer.stop(info);

            let timer = Timer::start(2213, "Solve sparse linear equation");
            let result = self
                .sparse_solver
                .prefactorize(&self.jac_flat)
                .and_then(|_| self.sparse_solver.solve_with_prefactorized(&self.del_pq, &mut self.delta));
            timer.stop(info);
            result?;

            let timer = Timer::start(2214, "Iterate unknown");
            max_dev = self.iterate_unknown();
            timer.stop(info);
            log::debug!("power flow iteration {}: max deviation {:e}", num_iter, max_dev);
        }
        record_iterations(info, num_iter);
        log::debug!("Newton's method power flow converged in {} iterations.", num_iter);

        let timer = Timer::start(2215, "Calculate math result");
        let output = calculate_pf_result(y_bus, input, self.u.clone());
        timer.stop(info);
        log::trace!("S bus: {}", format_rect_vec(&output.bus_injection));
        Ok(output)
    }

    fn initialize_unknown(&mut self, input: &PowerFlowInput<N>) {
        let u_ref = mean_source_voltage(&input.source);
        let offset = unit_angles::<N>();
        for bus in 0..self.n_bus {
            let theta = u_ref.arg() + self.topo.phase_shift[bus];
            let x = &mut self.x[bus];
            x.theta = from_fn(|p| theta + offset[p]);
            x.v = [u_ref.norm(); N];
            self.u[bus] = from_fn(|p| Complex64::from_polar(x.v[p], x.theta[p]));
        }
    }

    /// Jacobian `d(S_calc - S_spec) / d(theta, v)` and mismatch
    /// `S_spec - S_calc`.
    fn prepare_matrix_and_rhs(&mut self, y_bus: &YBus<N>, input: &PowerFlowInput<N>) {
        let lu = Arc::clone(y_bus.lu_pattern());
        let param = y_bus.math_model_param();
        let topo = &self.topo;
        let u = &self.u;
        let bs = Self::BLOCK;

        for row in 0..self.n_bus {
            let u_abs = cabs(&u[row]);
            let mut s_calc = zero_value::<N>();
            for pos in lu.row_indptr[row]..lu.row_indptr[row + 1] {
                self.data_jac[pos] = match y_bus.admittance_lu(pos) {
                    Some(y) => {
                        let col = lu.col_indices[pos];
                        let h = hm_complex_form(y, &u[row], &u[col]);
                        add_value(&mut s_calc, &sum_row(&h));
                        QuadBlock::from_hm(&h, &cabs(&u[col]))
                    }
                    None => QuadBlock::default(),
                };
            }
            let diag = &mut self.data_jac[lu.diag[row]];
            diag.add_diag_component(&s_calc, &u_abs);

            let mut s_spec = zero_value::<N>();
            for src in topo.sources(row) {
                let y_ref = &param.source_param[src].y_ref;
                let h = hm_complex_form(y_ref, &u[row], &u[row]);
                let s_internal = sum_row(&h);
                add_value(&mut s_calc, &s_internal);
                diag.add(&diag_jacobian(&h, &s_internal, &u_abs));

                let u_src = source_phasor::<N>(input.source[src], topo.phase_shift[row]);
                let s_ref = sum_row(&hm_complex_form(y_ref, &u[row], &u_src));
                add_value(&mut s_spec, &s_ref);
                diag.add_diag_component(&s_ref.map(|z| -z), &u_abs);
            }
            for lg in topo.load_gens(row) {
                let s = &input.s_injection[lg];
                for p in 0..N {
                    let v = u_abs[p];
                    let (value, dv) = match topo.load_gen_type[lg] {
                        LoadGenType::ConstPq => (s[p], Complex64::default()),
                        LoadGenType::ConstY => (s[p] * v * v, s[p] * 2.0 * v),
                        LoadGenType::ConstI => (s[p] * v, s[p]),
                    };
                    s_spec[p] += value;
                    diag.ur[p][p] -= dv.re;
                    diag.lr[p][p] -= dv.im;
                }
            }

            let rhs = &mut self.del_pq[row * bs..(row + 1) * bs];
            for p in 0..N {
                rhs[p] = s_spec[p].re - s_calc[p].re;
                rhs[N + p] = s_spec[p].im - s_calc[p].im;
            }
        }

        for (pos, block) in self.data_jac.iter().enumerate() {
            block.write(&mut self.jac_flat[pos * bs * bs..(pos + 1) * bs * bs], bs, 0, 0);
        }
    }

    fn iterate_unknown(&mut self) -> f64 {
        let bs = Self::BLOCK;
        let mut max_dev: f64 = 0.0;
        for bus in 0..self.n_bus {
            let d = &self.delta[bus * bs..(bus + 1) * bs];
            let x = &mut self.x[bus];
            let u_new: ComplexValue<N> =
                from_fn(|p| Complex64::from_polar(x.v[p] + d[N + p], x.theta[p] + d[p]));
            // a negative magnitude wraps into the angle
            x.theta = u_new.map(|z| z.arg());
            x.v = u_new.map(|z| z.norm());
            let dev = max_deviation(&u_new, &self.u[bus]);
            if dev.is_nan() || dev > max_dev {
                max_dev = dev;
            }
            self.u[bus] = u_new;
        }
        max_dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::params::{BranchCalcParam, MathModelParam, SourceCalcParam};
    use crate::tests::init_logging;
    use anyhow::{format_err, Result};

    fn radial(load_gen_type: LoadGenType) -> YBus<1> {
        let mut topo = MathModelTopology::new(3);
        topo.push_source(0);
        topo.push_load_gen(2, load_gen_type);
        topo.push_branch(Some(0), Some(1));
        topo.push_branch(Some(1), Some(2));
        let line = BranchCalcParam::pi_model(cmplx!(10.0, -20.0), cmplx!(0.0, 0.02));
        let param = MathModelParam {
            branch_param: vec![line, line],
            shunt_param: vec![],
            source_param: vec![SourceCalcParam::from_sequence(cmplx!(1e3, -1e4), cmplx!(1e3, -1e4))],
        };
        YBus::new(Arc::new(topo), Arc::new(param)).unwrap()
    }

    fn input() -> PowerFlowInput<1> {
        PowerFlowInput {
            source: vec![cmplx!(1.05)],
            s_injection: vec![[cmplx!(-0.5, -0.2)]],
        }
    }

    #[test]
    fn power_balance_at_convergence() -> Result<()> {
        init_logging();
        for load_gen_type in [LoadGenType::ConstPq, LoadGenType::ConstY, LoadGenType::ConstI] {
            let y_bus = radial(load_gen_type);
            let mut solver = NewtonRaphsonPfSolver::new(&y_bus);
            let mut info = CalculationInfo::new();
            let output = solver
                .run_power_flow(&y_bus, &input(), 1e-10, 20, &mut info)
                .map_err(|e| format_err!("{}", e))?;

            // bus 1 carries nothing, bus 2 the load
            assert!(output.bus_injection[1][0].norm() < 1e-8);
            assert!((output.bus_injection[2][0] - output.load_gen[0].s[0]).norm() < 1e-8);
            assert!((output.bus_injection[0][0] - output.source[0].s[0]).norm() < 1e-8);
            let v2 = output.u[2][0].norm();
            assert!(v2 < 1.05 && v2 > 0.9, "{:?}: {}", load_gen_type, v2);
            let expect = match load_gen_type {
                LoadGenType::ConstPq => 1.0,
                LoadGenType::ConstY => v2 * v2,
                LoadGenType::ConstI => v2,
            };
            assert!((output.load_gen[0].s[0] - cmplx!(-0.5, -0.2) * expect).norm() < 1e-8);
        }
        Ok(())
    }

    #[test]
    fn iteration_limit() {
        let y_bus = radial(LoadGenType::ConstPq);
        let mut solver = NewtonRaphsonPfSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let err = solver.run_power_flow(&y_bus, &input(), 1e-14, 1, &mut info);
        assert!(matches!(err, Err(SolverError::IterationDiverge { num_iter: 1, .. })));
        assert_eq!(info[crate::timer::KEY_MAX_ITERATIONS], 1.0);

        let mut bad = input();
        bad.s_injection.clear();
        assert!(matches!(
            solver.run_power_flow(&y_bus, &bad, 1e-8, 20, &mut info),
            Err(SolverError::InvalidInput { .. })
        ));
    }
}
