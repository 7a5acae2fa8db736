//! Linear power flow.
//!
//! Loads and generators become constant admittances at nominal voltage and
//! sources Thevenin equivalents, so one complex block solve gives the bus
//! voltages. The factorization is kept until the parameters or the
//! specified injections change.

use num_complex::Complex64;
use std::array::from_fn;
use std::sync::Arc;

use crate::debug::format_polar_vec;
use crate::error::Result;
use crate::newton_pf::source_phasor;
use crate::params::PowerFlowInput;
use crate::solver_output::{calculate_pf_result, SolverOutput};
use crate::sparse_lu::SparseLuSolver;
use crate::tensor::{add_tensor, mat_vec, write_tensor, zero_tensor, ComplexValue};
use crate::timer::{CalculationInfo, Timer};
use crate::topology::MathModelTopology;
use crate::ybus::YBus;

#[derive(Debug, Clone)]
pub struct LinearPfSolver<const N: usize> {
    n_bus: usize,
    topo: Arc<MathModelTopology>,
    mat_data: Vec<Complex64>,
    rhs: Vec<Complex64>,
    x: Vec<Complex64>,
    sparse_solver: SparseLuSolver<Complex64>,
    /// Injections the current factorization was built for.
    factorized_injection: Option<Vec<ComplexValue<N>>>,
}

impl<const N: usize> LinearPfSolver<N> {
    pub fn new(y_bus: &YBus<N>) -> Self {
        let n_bus = y_bus.size();
        let nnz_lu = y_bus.structure().nnz_lu();
        Self {
            n_bus,
            topo: Arc::clone(y_bus.shared_topology()),
            mat_data: vec![Complex64::default(); nnz_lu * N * N],
            rhs: vec![Complex64::default(); n_bus * N],
            x: vec![Complex64::default(); n_bus * N],
            sparse_solver: SparseLuSolver::new(Arc::clone(y_bus.lu_pattern()), N),
            factorized_injection: None,
        }
    }

    pub fn is_prefactorized(&self) -> bool {
        self.sparse_solver.is_factorized() && self.factorized_injection.is_some()
    }

    /// Drops the factorization after admittance changes.
    pub fn parameters_changed(&mut self) {
        self.sparse_solver.invalidate();
        self.factorized_injection = None;
    }

    pub fn run_power_flow(
        &mut self,
        y_bus: &YBus<N>,
        input: &PowerFlowInput<N>,
        info: &mut CalculationInfo,
    ) -> Result<SolverOutput<N>> {
        input.check(&self.topo)?;

        let timer = Timer::start(2241, "Prepare matrix");
        let reuse = self.is_prefactorized()
            && self.factorized_injection.as_ref() == Some(&input.s_injection);
        if !reuse {
            self.factorized_injection = None;
            self.prepare_matrix(y_bus, input);
        }
        self.prepare_rhs(y_bus, input);
        timer.stop(info);

        let timer = Timer::start(2242, "Solve sparse linear equation");
        let result = if reuse {
            Ok(())
        } else {
            self.sparse_solver.prefactorize(&self.mat_data)
        }
        .and_then(|_| self.sparse_solver.solve_with_prefactorized(&self.rhs, &mut self.x));
        timer.stop(info);
        result?;
        if !reuse {
            self.factorized_injection = Some(input.s_injection.clone());
        }

        let timer = Timer::start(2243, "Calculate math result");
        let u: Vec<ComplexValue<N>> = self
            .x
            .chunks_exact(N)
            .map(|c| from_fn(|p| c[p]))
            .collect();
        log::debug!("linear power flow voltage: {}", format_polar_vec(&u));
        let output = calculate_pf_result(y_bus, input, u);
        timer.stop(info);
        Ok(output)
    }

    fn prepare_matrix(&mut self, y_bus: &YBus<N>, input: &PowerFlowInput<N>) {
        let lu = y_bus.lu_pattern();
        let param = y_bus.math_model_param();
        let nn = N * N;
        for row in 0..self.n_bus {
            for pos in lu.row_indptr[row]..lu.row_indptr[row + 1] {
                let mut block = y_bus.admittance_lu(pos).copied().unwrap_or_else(zero_tensor);
                if pos == lu.diag[row] {
                    for src in self.topo.sources(row) {
                        add_tensor(&mut block, &param.source_param[src].y_ref);
                    }
                    for lg in self.topo.load_gens(row) {
                        for p in 0..N {
                            block[p][p] -= input.s_injection[lg][p].conj();
                        }
                    }
                }
                write_tensor(&block, &mut self.mat_data[pos * nn..(pos + 1) * nn]);
            }
        }
    }

    fn prepare_rhs(&mut self, y_bus: &YBus<N>, input: &PowerFlowInput<N>) {
        let param = y_bus.math_model_param();
        for bus in 0..self.n_bus {
            let mut i_inj = [Complex64::default(); N];
            for src in self.topo.sources(bus) {
                let u_src = source_phasor::<N>(input.source[src], self.topo.phase_shift[bus]);
                let i = mat_vec(&param.source_param[src].y_ref, &u_src);
                for p in 0..N {
                    i_inj[p] += i[p];
                }
            }
            self.rhs[bus * N..(bus + 1) * N].copy_from_slice(&i_inj);
        }
    }
}
