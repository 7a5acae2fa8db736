//! Sparse nodal admittance matrix.
//!
//! The structure (CSR pattern, element lists per entry and the LU pattern
//! with fill-ins) depends only on the topology and is shared through an
//! `Arc`. Numeric values are recomputed from the element parameters whenever
//! they change.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, SolverError};
use crate::params::MathModelParam;
use crate::solver_output::{ApplianceSolverOutput, BranchSolverOutput};
use crate::sparse_lu::LuPattern;
use crate::tensor::{add_tensor, add_value, mat_vec, power, zero_tensor, ComplexTensor, ComplexValue};
use crate::topology::MathModelTopology;

/// Contribution of an element to an admittance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum YBusElementType {
    /// Branch from-from.
    Bff,
    Bft,
    Btf,
    Btt,
    Shunt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct YBusElement {
    pub element_type: YBusElementType,
    pub idx: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YBusStructure {
    pub row_indptr: Vec<usize>,
    pub col_indices: Vec<usize>,
    /// Position of the diagonal entry of each bus.
    pub bus_entry: Vec<usize>,
    /// Elements contributing to entry `k` are
    /// `y_bus_element[y_bus_entry_indptr[k]..y_bus_entry_indptr[k + 1]]`.
    pub y_bus_element: Vec<YBusElement>,
    pub y_bus_entry_indptr: Vec<usize>,
    pub lu: Arc<LuPattern>,
    /// Admittance entry of each LU entry; `None` for fill-ins.
    pub map_lu_y_bus: Vec<Option<usize>>,
}

impl YBusStructure {
    pub fn new(topo: &MathModelTopology) -> Self {
        let n_bus = topo.n_bus();
        let mut entries: BTreeMap<(usize, usize), Vec<YBusElement>> =
            (0..n_bus).map(|i| ((i, i), Vec::new())).collect();
        let mut add = |row: usize, col: usize, element_type, idx| {
            entries.entry((row, col)).or_default().push(YBusElement { element_type, idx });
        };
        for (b, sides) in topo.branch_bus_idx.iter().enumerate() {
            if let Some(f) = sides[0] {
                add(f, f, YBusElementType::Bff, b);
            }
            if let Some(t) = sides[1] {
                add(t, t, YBusElementType::Btt, b);
            }
            if let [Some(f), Some(t)] = *sides {
                add(f, t, YBusElementType::Bft, b);
                add(t, f, YBusElementType::Btf, b);
            }
        }
        for bus in 0..n_bus {
            for s in topo.shunts(bus) {
                add(bus, bus, YBusElementType::Shunt, s);
            }
        }

        let mut row_indptr = vec![0; n_bus + 1];
        let mut col_indices = Vec::with_capacity(entries.len());
        let mut bus_entry = vec![0; n_bus];
        let mut y_bus_element = Vec::new();
        let mut y_bus_entry_indptr = vec![0];
        for ((row, col), elements) in entries {
            if row == col {
                bus_entry[row] = col_indices.len();
            }
            row_indptr[row + 1] += 1;
            col_indices.push(col);
            y_bus_element.extend(elements);
            y_bus_entry_indptr.push(y_bus_element.len());
        }
        for i in 0..n_bus {
            row_indptr[i + 1] += row_indptr[i];
        }

        let lu = LuPattern::from_symmetric_pattern(n_bus, &row_indptr, &col_indices);
        let map_lu_y_bus = (0..n_bus)
            .flat_map(|i| lu.col_indices[lu.row_indptr[i]..lu.row_indptr[i + 1]].iter().map(move |&j| (i, j)))
            .map(|(i, j)| {
                let (start, end) = (row_indptr[i], row_indptr[i + 1]);
                col_indices[start..end]
                    .binary_search(&j)
                    .ok()
                    .map(|k| start + k)
            })
            .collect();

        Self {
            row_indptr,
            col_indices,
            bus_entry,
            y_bus_element,
            y_bus_entry_indptr,
            lu: Arc::new(lu),
            map_lu_y_bus,
        }
    }

    pub fn size(&self) -> usize {
        self.bus_entry.len()
    }

    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    pub fn nnz_lu(&self) -> usize {
        self.lu.nnz()
    }

    pub fn elements(&self, entry: usize) -> &[YBusElement] {
        &self.y_bus_element[self.y_bus_entry_indptr[entry]..self.y_bus_entry_indptr[entry + 1]]
    }
}

/// Admittance matrix with values for one set of parameters.
#[derive(Debug, Clone)]
pub struct YBus<const N: usize> {
    structure: Arc<YBusStructure>,
    topo: Arc<MathModelTopology>,
    param: Arc<MathModelParam<N>>,
    admittance: Arc<Vec<ComplexTensor<N>>>,
}

impl<const N: usize> YBus<N> {
    pub fn new(topo: Arc<MathModelTopology>, param: Arc<MathModelParam<N>>) -> Result<Self> {
        topo.validate()?;
        check_param(&topo, &param)?;
        let structure = Arc::new(YBusStructure::new(&topo));
        let admittance = Arc::new(assemble(&structure, &param));
        log::debug!(
            "admittance matrix: {} buses, {} entries, {} LU entries",
            structure.size(),
            structure.nnz(),
            structure.nnz_lu()
        );
        Ok(Self {
            structure,
            topo,
            param,
            admittance,
        })
    }

    /// Recomputes the numeric values for new parameters of the same topology.
    pub fn update_admittance(&mut self, param: Arc<MathModelParam<N>>) -> Result<()> {
        check_param(&self.topo, &param)?;
        self.admittance = Arc::new(assemble(&self.structure, &param));
        self.param = param;
        Ok(())
    }

    pub fn structure(&self) -> &Arc<YBusStructure> {
        &self.structure
    }

    pub fn shared_topology(&self) -> &Arc<MathModelTopology> {
        &self.topo
    }

    pub fn math_model_param(&self) -> &MathModelParam<N> {
        &self.param
    }

    pub fn admittance(&self) -> &[ComplexTensor<N>] {
        &self.admittance
    }

    pub fn size(&self) -> usize {
        self.structure.size()
    }

    pub fn lu_pattern(&self) -> &Arc<LuPattern> {
        &self.structure.lu
    }

    /// Admittance at an LU entry, `None` for fill-ins.
    pub fn admittance_lu(&self, pos: usize) -> Option<&ComplexTensor<N>> {
        self.structure.map_lu_y_bus[pos].map(|k| &self.admittance[k])
    }

    /// Current injection `Y u` of each bus.
    pub fn calculate_current_injection(&self, u: &[ComplexValue<N>]) -> Vec<ComplexValue<N>> {
        let s = &self.structure;
        (0..s.size())
            .map(|i| {
                let mut i_inj = [num_complex::Complex64::default(); N];
                for k in s.row_indptr[i]..s.row_indptr[i + 1] {
                    add_value(&mut i_inj, &mat_vec(&self.admittance[k], &u[s.col_indices[k]]));
                }
                i_inj
            })
            .collect()
    }

    /// Power injection `u conj(Y u)` of each bus.
    pub fn calculate_injection(&self, u: &[ComplexValue<N>]) -> Vec<ComplexValue<N>> {
        self.calculate_current_injection(u)
            .iter()
            .zip(u)
            .map(|(i, u)| power(u, i))
            .collect()
    }

    /// Power and current entering each branch at both sides.
    pub fn calculate_branch_flow(&self, u: &[ComplexValue<N>]) -> Vec<BranchSolverOutput<N>> {
        let zero = [num_complex::Complex64::default(); N];
        self.topo
            .branch_bus_idx
            .iter()
            .zip(&self.param.branch_param)
            .map(|(sides, param)| {
                let u_f = sides[0].map_or(zero, |b| u[b]);
                let u_t = sides[1].map_or(zero, |b| u[b]);
                let mut i_f = mat_vec(&param.yff, &u_f);
                add_value(&mut i_f, &mat_vec(&param.yft, &u_t));
                let mut i_t = mat_vec(&param.ytf, &u_f);
                add_value(&mut i_t, &mat_vec(&param.ytt, &u_t));
                BranchSolverOutput {
                    s_f: power(&u_f, &i_f),
                    s_t: power(&u_t, &i_t),
                    i_f,
                    i_t,
                }
            })
            .collect()
    }

    /// Power and current injected into the bus by each shunt.
    pub fn calculate_shunt_flow(&self, u: &[ComplexValue<N>]) -> Vec<ApplianceSolverOutput<N>> {
        let mut out = Vec::with_capacity(self.topo.n_shunt());
        for bus in 0..self.topo.n_bus() {
            for s in self.topo.shunts(bus) {
                let i = mat_vec(&self.param.shunt_param[s], &u[bus]).map(|z| -z);
                out.push(ApplianceSolverOutput {
                    s: power(&u[bus], &i),
                    i,
                });
            }
        }
        out
    }
}

fn check_param<const N: usize>(topo: &MathModelTopology, param: &MathModelParam<N>) -> Result<()> {
    let counts = [
        ("branch", param.branch_param.len(), topo.n_branch()),
        ("shunt", param.shunt_param.len(), topo.n_shunt()),
        ("source", param.source_param.len(), topo.n_source()),
    ];
    for (name, actual, expected) in counts {
        if actual != expected {
            return Err(SolverError::InvalidTopology {
                what: format!("{} {} parameters given for {} elements", actual, name, expected),
            });
        }
    }
    Ok(())
}

fn assemble<const N: usize>(
    structure: &YBusStructure,
    param: &MathModelParam<N>,
) -> Vec<ComplexTensor<N>> {
    (0..structure.nnz())
        .map(|k| {
            let mut y = zero_tensor();
            for element in structure.elements(k) {
                let idx = element.idx;
                let value = match element.element_type {
                    YBusElementType::Bff => &param.branch_param[idx].yff,
                    YBusElementType::Bft => &param.branch_param[idx].yft,
                    YBusElementType::Btf => &param.branch_param[idx].ytf,
                    YBusElementType::Btt => &param.branch_param[idx].ytt,
                    YBusElementType::Shunt => &param.shunt_param[idx],
                };
                add_tensor(&mut y, value);
            }
            y
        })
        .collect()
}
