//! Short circuit calculation.
//!
//! The network is linear: sources are Thevenin equivalents at the scaled
//! reference voltage and faults are admittances to ground or between
//! phases. Ideal faults are not added as huge admittances. Instead the
//! column of the faulted phase is removed and its unknown replaced by the
//! current flowing into the network, so the pinned voltage becomes an
//! algebraic constraint.

use num_complex::Complex64;
use std::array::from_fn;
use std::sync::Arc;

use crate::debug::{format_polar_vec, format_rect_vec};
use crate::error::{Result, SolverError};
use crate::newton_pf::source_phasor;
use crate::options::FaultType;
use crate::params::ShortCircuitInput;
use crate::solver_output::{
    calculate_sc_flows, calculate_source_result, FaultShortCircuitSolverOutput, ShortCircuitSolverOutput,
};
use crate::sparse_lu::{LuPattern, SparseLuSolver};
use crate::tensor::{add_tensor, add_value, mat_vec, write_tensor, zero_tensor, zero_value, ComplexTensor, ComplexValue};
use crate::timer::{CalculationInfo, Timer};
use crate::topology::MathModelTopology;
use crate::ybus::YBus;

/// How a bus was constrained by its first ideal fault.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Surgery {
    /// Faulted phases pinned to zero voltage.
    Pinned,
    /// Second faulted phase joined to the first.
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AppliedFault {
    Skipped,
    Finite(Complex64),
    Ideal,
    /// Phases joined and grounded through an admittance.
    MergedToGround(Complex64),
}

#[derive(Debug, Clone)]
pub struct ShortCircuitSolver<const N: usize> {
    n_bus: usize,
    topo: Arc<MathModelTopology>,
    mat_data: Vec<ComplexTensor<N>>,
    mat_flat: Vec<Complex64>,
    rhs: Vec<ComplexValue<N>>,
    /// Source current injection before fault constraints move it.
    rhs_src: Vec<ComplexValue<N>>,
    rhs_flat: Vec<Complex64>,
    x: Vec<Complex64>,
    surgery: Vec<Option<Surgery>>,
    applied: Vec<AppliedFault>,
    sparse_solver: SparseLuSolver<Complex64>,
}

impl<const N: usize> ShortCircuitSolver<N> {
    pub fn new(y_bus: &YBus<N>) -> Self {
        let n_bus = y_bus.size();
        let nnz_lu = y_bus.structure().nnz_lu();
        let topo = Arc::clone(y_bus.shared_topology());
        Self {
            n_bus,
            mat_data: vec![zero_tensor(); nnz_lu],
            mat_flat: vec![Complex64::default(); nnz_lu * N * N],
            rhs: vec![zero_value(); n_bus],
            rhs_src: vec![zero_value(); n_bus],
            rhs_flat: vec![Complex64::default(); n_bus * N],
            x: vec![Complex64::default(); n_bus * N],
            surgery: vec![None; n_bus],
            applied: vec![AppliedFault::Skipped; topo.n_fault()],
            sparse_solver: SparseLuSolver::new(Arc::clone(y_bus.lu_pattern()), N),
            topo,
        }
    }

    pub fn run_short_circuit(
        &mut self,
        y_bus: &YBus<N>,
        input: &ShortCircuitInput,
        source_voltage_ref: f64,
        info: &mut CalculationInfo,
    ) -> Result<ShortCircuitSolverOutput<N>> {
        input.check(&self.topo)?;
        let fault_phase = input.fault_type.check(input.fault_phase, N)?;
        for fault in &input.faults {
            let y = fault.y_fault;
            if fault.is_ideal() && !y.im.is_infinite() {
                return Err(SolverError::InvalidFaultAdmittance { re: y.re, im: y.im });
            }
        }
        let phases: Vec<usize> = match input.fault_type {
            FaultType::ThreePhase => (0..N).collect(),
            _ => fault_phase.indices().to_vec(),
        };

        let timer = Timer::start(2231, "Prepare matrix and rhs");
        self.prepare_matrix_and_rhs(y_bus, input, source_voltage_ref);
        self.apply_faults(y_bus.lu_pattern(), input, &phases);
        let nn = N * N;
        for (pos, block) in self.mat_data.iter().enumerate() {
            write_tensor(block, &mut self.mat_flat[pos * nn..(pos + 1) * nn]);
        }
        for (bus, rhs) in self.rhs.iter().enumerate() {
            self.rhs_flat[bus * N..(bus + 1) * N].copy_from_slice(rhs);
        }
        timer.stop(info);

        let timer = Timer::start(2232, "Solve sparse linear equation");
        let result = self
            .sparse_solver
            .prefactorize(&self.mat_flat)
            .and_then(|_| self.sparse_solver.solve_with_prefactorized(&self.rhs_flat, &mut self.x));
        timer.stop(info);
        result?;

        let timer = Timer::start(2233, "Calculate math result");
        let output = self.calculate_result(y_bus, input, source_voltage_ref, &phases);
        timer.stop(info);
        log::debug!("short circuit voltage: {}", format_polar_vec(&output.u_bus));
        Ok(output)
    }

    /// Copies the admittance values and adds the sources.
    fn prepare_matrix_and_rhs(&mut self, y_bus: &YBus<N>, input: &ShortCircuitInput, source_voltage_ref: f64) {
        let lu = y_bus.lu_pattern();
        let param = y_bus.math_model_param();
        for (pos, block) in self.mat_data.iter_mut().enumerate() {
            *block = y_bus.admittance_lu(pos).copied().unwrap_or_else(zero_tensor);
        }
        for bus in 0..self.n_bus {
            let mut rhs = zero_value::<N>();
            for src in self.topo.sources(bus) {
                let y_ref = &param.source_param[src].y_ref;
                add_tensor(&mut self.mat_data[lu.diag[bus]], y_ref);
                let u_src = source_phasor::<N>(
                    input.source[src] * source_voltage_ref,
                    self.topo.phase_shift[bus],
                );
                add_value(&mut rhs, &mat_vec(y_ref, &u_src));
            }
            self.rhs[bus] = rhs;
            self.rhs_src[bus] = rhs;
        }
    }

    fn apply_faults(&mut self, lu: &LuPattern, input: &ShortCircuitInput, phases: &[usize]) {
        self.surgery.fill(None);
        self.applied.fill(AppliedFault::Skipped);
        for bus in 0..self.n_bus {
            for f in self.topo.faults(bus) {
                if self.surgery[bus].is_some() {
                    log::warn!("fault {} ignored: bus {} is already constrained by an earlier fault", f, bus);
                    continue;
                }
                let fault = &input.faults[f];
                let (y, ideal) = (fault.y_fault, fault.is_ideal());
                let diag = lu.diag[bus];
                self.applied[f] = match (input.fault_type, ideal) {
                    (FaultType::TwoPhase, true) => {
                        self.merge_phases(lu, bus, phases[0], phases[1]);
                        AppliedFault::Ideal
                    }
                    (FaultType::TwoPhaseToGround, false) => {
                        self.merge_phases(lu, bus, phases[0], phases[1]);
                        self.mat_data[diag][phases[1]][phases[0]] += y;
                        AppliedFault::MergedToGround(y)
                    }
                    (_, true) => {
                        self.pin_phases(lu, bus, phases);
                        AppliedFault::Ideal
                    }
                    (FaultType::TwoPhase, false) => {
                        let (p1, p2) = (phases[0], phases[1]);
                        let block = &mut self.mat_data[diag];
                        block[p1][p1] += y;
                        block[p2][p2] += y;
                        block[p1][p2] -= y;
                        block[p2][p1] -= y;
                        AppliedFault::Finite(y)
                    }
                    (_, false) => {
                        for &p in phases {
                            self.mat_data[diag][p][p] += y;
                        }
                        AppliedFault::Finite(y)
                    }
                };
            }
        }
    }

    /// Positions of all blocks in the column of `bus`.
    fn column(lu: &LuPattern, bus: usize) -> impl Iterator<Item = usize> + '_ {
        (lu.row_indptr[bus]..lu.row_indptr[bus + 1]).map(move |pos| lu.transpose_entry[pos])
    }

    fn pin_phases(&mut self, lu: &LuPattern, bus: usize, phases: &[usize]) {
        for pos in Self::column(lu, bus) {
            for row in self.mat_data[pos].iter_mut() {
                for &p in phases {
                    row[p] = Complex64::default();
                }
            }
        }
        let diag = &mut self.mat_data[lu.diag[bus]];
        for &p in phases {
            diag[p][p] = Complex64::new(-1.0, 0.0);
            self.rhs[bus][p] = Complex64::default();
        }
        self.surgery[bus] = Some(Surgery::Pinned);
    }

    fn merge_phases(&mut self, lu: &LuPattern, bus: usize, p1: usize, p2: usize) {
        for pos in Self::column(lu, bus) {
            for row in self.mat_data[pos].iter_mut() {
                let moved = std::mem::take(&mut row[p2]);
                row[p1] += moved;
            }
        }
        let diag = &mut self.mat_data[lu.diag[bus]];
        diag[p1][p2] = Complex64::new(-1.0, 0.0);
        diag[p2][p2] = Complex64::new(1.0, 0.0);
        let rhs = &mut self.rhs[bus];
        let moved = std::mem::take(&mut rhs[p1]);
        rhs[p2] += moved;
        self.surgery[bus] = Some(Surgery::Merged);
    }

    fn calculate_result(
        &self,
        y_bus: &YBus<N>,
        input: &ShortCircuitInput,
        source_voltage_ref: f64,
        phases: &[usize],
    ) -> ShortCircuitSolverOutput<N> {
        let x: Vec<ComplexValue<N>> = self.x.chunks_exact(N).map(|c| from_fn(|p| c[p])).collect();
        let mut u_bus = x.clone();
        for bus in 0..self.n_bus {
            match self.surgery[bus] {
                Some(Surgery::Pinned) => phases.iter().for_each(|&p| u_bus[bus][p] = Complex64::default()),
                Some(Surgery::Merged) => u_bus[bus][phases[1]] = u_bus[bus][phases[0]],
                None => {}
            }
        }

        let mut fault = vec![FaultShortCircuitSolverOutput::default(); self.topo.n_fault()];
        for bus in 0..self.n_bus {
            let u = &u_bus[bus];
            for f in self.topo.faults(bus) {
                let mut i_fault = zero_value::<N>();
                match self.applied[f] {
                    AppliedFault::Skipped => {}
                    AppliedFault::Finite(y) => match input.fault_type {
                        FaultType::TwoPhase => {
                            let (p1, p2) = (phases[0], phases[1]);
                            i_fault[p1] = y * (u[p1] - u[p2]);
                            i_fault[p2] = -i_fault[p1];
                        }
                        _ => phases.iter().for_each(|&p| i_fault[p] = y * u[p]),
                    },
                    AppliedFault::Ideal if self.surgery[bus] == Some(Surgery::Pinned) => {
                        for &p in phases {
                            i_fault[p] = self.rhs_src[bus][p] - x[bus][p];
                        }
                    }
                    AppliedFault::Ideal | AppliedFault::MergedToGround(_) => {
                        let (p1, p2) = (phases[0], phases[1]);
                        i_fault[p1] = self.rhs_src[bus][p1] - x[bus][p2];
                        i_fault[p2] = match self.applied[f] {
                            AppliedFault::MergedToGround(y) => y * u[p1] - i_fault[p1],
                            _ => -i_fault[p1],
                        };
                    }
                }
                fault[f] = FaultShortCircuitSolverOutput { i_fault };
            }
        }
        log::trace!(
            "fault current: {}",
            format_rect_vec(&fault.iter().map(|f| f.i_fault).collect::<Vec<_>>())
        );

        let param = y_bus.math_model_param();
        let mut source = Vec::with_capacity(self.topo.n_source());
        for bus in 0..self.n_bus {
            for src in self.topo.sources(bus) {
                source.push(calculate_source_result(
                    &param.source_param[src],
                    input.source[src] * source_voltage_ref,
                    self.topo.phase_shift[bus],
                    &u_bus[bus],
                ));
            }
        }
        let (branch, shunt) = calculate_sc_flows(y_bus, &u_bus);
        ShortCircuitSolverOutput {
            u_bus,
            fault,
            branch,
            source,
            shunt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmplx;
    use crate::options::FaultPhase;
    use crate::params::{BranchCalcParam, FaultCalcParam, MathModelParam, SourceCalcParam};
    use anyhow::{format_err, Result};

    /// Bus 0 with two sources and the faults, a remote bus 1 with a shunt.
    fn network<const N: usize>(faults: usize) -> YBus<N> {
        let mut topo = MathModelTopology::new(2);
        topo.push_source(0);
        topo.push_source(0);
        for _ in 0..faults {
            topo.push_fault(0);
        }
        topo.push_shunt(1);
        topo.push_branch(Some(0), Some(1));
        let param = MathModelParam {
            branch_param: vec![BranchCalcParam::pi_model(cmplx!(4.0, -12.0), cmplx!(0.0, 0.1))],
            shunt_param: vec![crate::tensor::diag_tensor(cmplx!(0.5, -0.1))],
            source_param: vec![
                SourceCalcParam::from_sequence(cmplx!(1.0, -10.0), cmplx!(1.0, -10.0)),
                SourceCalcParam::from_sequence(cmplx!(2.0, -30.0), cmplx!(2.0, -30.0)),
            ],
        };
        YBus::new(Arc::new(topo), Arc::new(param)).unwrap()
    }

    fn input(fault_type: FaultType, fault_phase: FaultPhase, faults: Vec<FaultCalcParam>) -> ShortCircuitInput {
        ShortCircuitInput {
            fault_type,
            fault_phase,
            faults,
            source: vec![cmplx!(1.0), cmplx!(1.0)],
            u_rated: 10e3,
        }
    }

    #[test]
    fn ideal_three_phase_fault_current() -> Result<()> {
        let y_bus = network::<1>(1);
        let mut solver = ShortCircuitSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let sc_input = input(FaultType::ThreePhase, FaultPhase::DefaultValue, vec![FaultCalcParam::ideal()]);
        let output = solver
            .run_short_circuit(&y_bus, &sc_input, 1.1, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        let expect = (cmplx!(1.0, -10.0) + cmplx!(2.0, -30.0)) * 1.1;
        assert!((output.fault[0].i_fault[0] - expect).norm() < 1e-9);
        assert_eq!(output.u_bus[0][0], cmplx!());
        // nothing feeds the remote bus
        assert!(output.u_bus[1][0].norm() < 1e-12);
        assert!((output.source[0].i[0] + output.source[1].i[0] - expect).norm() < 1e-9);
        Ok(())
    }

    #[test]
    fn finite_fault_matches_divider() -> Result<()> {
        let y_bus = network::<1>(1);
        let mut solver = ShortCircuitSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let y_f = cmplx!(50.0, 0.0);
        let sc_input = input(FaultType::ThreePhase, FaultPhase::Abc, vec![FaultCalcParam { y_fault: y_f }]);
        let output = solver
            .run_short_circuit(&y_bus, &sc_input, 1.1, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        let u = output.u_bus[0][0];
        assert!((output.fault[0].i_fault[0] - y_f * u).norm() < 1e-12);
        // current balance at the faulted bus
        let i_src = output.source[0].i[0] + output.source[1].i[0];
        assert!((i_src - output.fault[0].i_fault[0] - output.branch[0].i_f[0]).norm() < 1e-9);
        Ok(())
    }

    #[test]
    fn surgery_only_touches_faulted_column() {
        let y_bus = network::<3>(1);
        let lu = Arc::clone(y_bus.lu_pattern());
        let mut solver = ShortCircuitSolver::new(&y_bus);
        let sc_input = input(
            FaultType::SinglePhaseToGround,
            FaultPhase::B,
            vec![FaultCalcParam::ideal()],
        );
        solver.prepare_matrix_and_rhs(&y_bus, &sc_input, 1.1);
        let before = solver.mat_data.clone();
        solver.apply_faults(&lu, &sc_input, &[1]);

        let column: Vec<usize> = ShortCircuitSolver::<3>::column(&lu, 0).collect();
        for pos in 0..lu.nnz() {
            for r in 0..3 {
                for c in 0..3 {
                    let (old, new) = (before[pos][r][c], solver.mat_data[pos][r][c]);
                    if column.contains(&pos) && c == 1 {
                        let expect = if pos == lu.diag[0] && r == 1 { cmplx!(-1.0) } else { cmplx!() };
                        assert_eq!(new, expect);
                    } else {
                        assert_eq!(new, old, "block {} ({}, {})", pos, r, c);
                    }
                }
            }
        }
        assert_eq!(solver.rhs[0][1], cmplx!());
        assert_eq!(solver.rhs[0][0], solver.rhs_src[0][0]);
    }

    #[test]
    fn two_phase_fault_is_balanced() -> Result<()> {
        let y_bus = network::<3>(1);
        let mut solver = ShortCircuitSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let sc_input = input(FaultType::TwoPhase, FaultPhase::Bc, vec![FaultCalcParam::ideal()]);
        let output = solver
            .run_short_circuit(&y_bus, &sc_input, 1.1, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        let i = output.fault[0].i_fault;
        let u = output.u_bus[0];
        assert_eq!(i[0], cmplx!());
        assert!(i[1].norm() > 1.0);
        assert_eq!(i[2], -i[1]);
        assert_eq!(u[1], u[2]);
        // phase a stays close to its source voltage
        assert!(u[0].norm() > 0.9);
        Ok(())
    }

    #[test]
    fn first_ideal_fault_wins() -> Result<()> {
        let y_bus = network::<3>(2);
        let mut solver = ShortCircuitSolver::new(&y_bus);
        let mut info = CalculationInfo::new();
        let sc_input = input(
            FaultType::SinglePhaseToGround,
            FaultPhase::A,
            vec![FaultCalcParam::ideal(), FaultCalcParam::ideal()],
        );
        let output = solver
            .run_short_circuit(&y_bus, &sc_input, 1.1, &mut info)
            .map_err(|e| format_err!("{}", e))?;
        assert!(output.fault[0].i_fault[0].norm() > 1.0);
        assert_eq!(output.fault[1].i_fault, zero_value());
        Ok(())
    }

    #[test]
    fn rejects_invalid_requests() {
        let mut info = CalculationInfo::new();
        let sym = network::<1>(1);
        let mut solver = ShortCircuitSolver::new(&sym);
        let sc_input = input(FaultType::SinglePhaseToGround, FaultPhase::A, vec![FaultCalcParam::ideal()]);
        assert!(matches!(
            solver.run_short_circuit(&sym, &sc_input, 1.1, &mut info),
            Err(SolverError::InvalidShortCircuitType { .. })
        ));

        let asym = network::<3>(1);
        let mut solver = ShortCircuitSolver::new(&asym);
        let sc_input = input(FaultType::TwoPhase, FaultPhase::Abc, vec![FaultCalcParam::ideal()]);
        assert!(matches!(
            solver.run_short_circuit(&asym, &sc_input, 1.1, &mut info),
            Err(SolverError::InvalidShortCircuitPhases { .. })
        ));

        let bad = FaultCalcParam {
            y_fault: cmplx!(f64::INFINITY, 1.0),
        };
        let sc_input = input(FaultType::SinglePhaseToGround, FaultPhase::A, vec![bad]);
        assert!(matches!(
            solver.run_short_circuit(&asym, &sc_input, 1.1, &mut info),
            Err(SolverError::InvalidFaultAdmittance { .. })
        ));
    }
}
