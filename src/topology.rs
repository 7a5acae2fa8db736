use std::ops::Range;

use crate::error::{Result, SolverError};

/// Voltage dependency of a load or generator.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub enum LoadGenType {
    /// Constant power.
    #[default]
    ConstPq,
    /// Constant impedance.
    ConstY,
    /// Constant current.
    ConstI,
}

/// Element a power sensor is attached to.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum MeasuredTerminalType {
    LoadGen,
    Source,
    Shunt,
    BranchFrom,
    BranchTo,
}

/// Immutable description of a calculation network.
///
/// Elements owned by a bus (or by another element, for sensors) are stored
/// contiguously and located with CSR-style index pointers: the elements of
/// owner `i` are `indptr[i]..indptr[i + 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MathModelTopology {
    pub slack_bus: usize,
    /// Phase shift of each bus relative to the slack bus, in radians.
    pub phase_shift: Vec<f64>,
    /// From and to bus of each branch. `None` marks an open side.
    pub branch_bus_idx: Vec<[Option<usize>; 2]>,
    pub shunt_bus_indptr: Vec<usize>,
    pub load_gen_bus_indptr: Vec<usize>,
    pub load_gen_type: Vec<LoadGenType>,
    pub source_bus_indptr: Vec<usize>,
    pub fault_bus_indptr: Vec<usize>,

    pub voltage_sensor_indptr: Vec<usize>,
    pub power_sensor_load_gen_indptr: Vec<usize>,
    pub power_sensor_source_indptr: Vec<usize>,
    pub power_sensor_shunt_indptr: Vec<usize>,
    pub power_sensor_branch_from_indptr: Vec<usize>,
    pub power_sensor_branch_to_indptr: Vec<usize>,
}

fn last(indptr: &[usize]) -> usize {
    indptr.last().copied().unwrap_or(0)
}

impl MathModelTopology {
    /// Topology of `n_bus` buses with no elements.
    pub fn new(n_bus: usize) -> Self {
        let empty = vec![0; n_bus + 1];
        Self {
            slack_bus: 0,
            phase_shift: vec![0.0; n_bus],
            branch_bus_idx: Vec::new(),
            shunt_bus_indptr: empty.clone(),
            load_gen_bus_indptr: empty.clone(),
            load_gen_type: Vec::new(),
            source_bus_indptr: empty.clone(),
            fault_bus_indptr: empty.clone(),
            voltage_sensor_indptr: empty,
            power_sensor_load_gen_indptr: vec![0],
            power_sensor_source_indptr: vec![0],
            power_sensor_shunt_indptr: vec![0],
            power_sensor_branch_from_indptr: vec![0],
            power_sensor_branch_to_indptr: vec![0],
        }
    }

    pub fn n_bus(&self) -> usize {
        self.phase_shift.len()
    }
    pub fn n_branch(&self) -> usize {
        self.branch_bus_idx.len()
    }
    pub fn n_shunt(&self) -> usize {
        last(&self.shunt_bus_indptr)
    }
    pub fn n_load_gen(&self) -> usize {
        last(&self.load_gen_bus_indptr)
    }
    pub fn n_source(&self) -> usize {
        last(&self.source_bus_indptr)
    }
    pub fn n_fault(&self) -> usize {
        last(&self.fault_bus_indptr)
    }
    pub fn n_voltage_sensor(&self) -> usize {
        last(&self.voltage_sensor_indptr)
    }

    pub fn shunts(&self, bus: usize) -> Range<usize> {
        self.shunt_bus_indptr[bus]..self.shunt_bus_indptr[bus + 1]
    }
    pub fn load_gens(&self, bus: usize) -> Range<usize> {
        self.load_gen_bus_indptr[bus]..self.load_gen_bus_indptr[bus + 1]
    }
    pub fn sources(&self, bus: usize) -> Range<usize> {
        self.source_bus_indptr[bus]..self.source_bus_indptr[bus + 1]
    }
    pub fn faults(&self, bus: usize) -> Range<usize> {
        self.fault_bus_indptr[bus]..self.fault_bus_indptr[bus + 1]
    }

    /// Bus of the element `idx` in a bus index pointer.
    pub fn owner(indptr: &[usize], idx: usize) -> usize {
        indptr.partition_point(|&p| p <= idx) - 1
    }

    /// Appends a load/generator at `bus`. Buses must be added in order.
    pub fn push_load_gen(&mut self, bus: usize, load_gen_type: LoadGenType) {
        push_to(&mut self.load_gen_bus_indptr, bus);
        self.load_gen_type.push(load_gen_type);
        self.power_sensor_load_gen_indptr.push(last(&self.power_sensor_load_gen_indptr));
    }

    pub fn push_source(&mut self, bus: usize) {
        push_to(&mut self.source_bus_indptr, bus);
        self.power_sensor_source_indptr.push(last(&self.power_sensor_source_indptr));
    }

    pub fn push_shunt(&mut self, bus: usize) {
        push_to(&mut self.shunt_bus_indptr, bus);
        self.power_sensor_shunt_indptr.push(last(&self.power_sensor_shunt_indptr));
    }

    pub fn push_fault(&mut self, bus: usize) {
        push_to(&mut self.fault_bus_indptr, bus);
    }

    pub fn push_branch(&mut self, from: Option<usize>, to: Option<usize>) {
        self.branch_bus_idx.push([from, to]);
        self.power_sensor_branch_from_indptr.push(last(&self.power_sensor_branch_from_indptr));
        self.power_sensor_branch_to_indptr.push(last(&self.power_sensor_branch_to_indptr));
    }

    pub fn push_voltage_sensor(&mut self, bus: usize) {
        push_to(&mut self.voltage_sensor_indptr, bus);
    }

    /// Appends a power sensor measuring element `idx` of the given kind.
    pub fn push_power_sensor(&mut self, terminal: MeasuredTerminalType, idx: usize) {
        let indptr = match terminal {
            MeasuredTerminalType::LoadGen => &mut self.power_sensor_load_gen_indptr,
            MeasuredTerminalType::Source => &mut self.power_sensor_source_indptr,
            MeasuredTerminalType::Shunt => &mut self.power_sensor_shunt_indptr,
            MeasuredTerminalType::BranchFrom => &mut self.power_sensor_branch_from_indptr,
            MeasuredTerminalType::BranchTo => &mut self.power_sensor_branch_to_indptr,
        };
        push_to(indptr, idx);
    }

    /// Checks index pointer shapes and bus references.
    pub fn validate(&self) -> Result<()> {
        let n_bus = self.n_bus();
        if self.slack_bus >= n_bus {
            return Err(invalid(format!(
                "slack bus {} out of range for {} buses",
                self.slack_bus, n_bus
            )));
        }
        for (b, sides) in self.branch_bus_idx.iter().enumerate() {
            for bus in sides.iter().flatten() {
                if *bus >= n_bus {
                    return Err(invalid(format!("branch {} refers to bus {}", b, bus)));
                }
            }
            if sides[0].is_some() && sides[0] == sides[1] {
                return Err(invalid(format!("branch {} connects a bus to itself", b)));
            }
        }
        check_indptr("shunt", &self.shunt_bus_indptr, n_bus, None)?;
        check_indptr("load_gen", &self.load_gen_bus_indptr, n_bus, Some(self.load_gen_type.len()))?;
        check_indptr("source", &self.source_bus_indptr, n_bus, None)?;
        check_indptr("fault", &self.fault_bus_indptr, n_bus, None)?;
        check_indptr("voltage sensor", &self.voltage_sensor_indptr, n_bus, None)?;
        check_indptr(
            "load_gen power sensor",
            &self.power_sensor_load_gen_indptr,
            self.n_load_gen(),
            None,
        )?;
        check_indptr(
            "source power sensor",
            &self.power_sensor_source_indptr,
            self.n_source(),
            None,
        )?;
        check_indptr(
            "shunt power sensor",
            &self.power_sensor_shunt_indptr,
            self.n_shunt(),
            None,
        )?;
        check_indptr(
            "branch from power sensor",
            &self.power_sensor_branch_from_indptr,
            self.n_branch(),
            None,
        )?;
        check_indptr(
            "branch to power sensor",
            &self.power_sensor_branch_to_indptr,
            self.n_branch(),
            None,
        )?;
        Ok(())
    }
}

fn push_to(indptr: &mut [usize], owner: usize) {
    for p in indptr.iter_mut().skip(owner + 1) {
        *p += 1;
    }
}

fn invalid(what: String) -> SolverError {
    SolverError::InvalidTopology { what }
}

fn check_indptr(name: &str, indptr: &[usize], n_owner: usize, count: Option<usize>) -> Result<()> {
    if indptr.len() != n_owner + 1 {
        return Err(invalid(format!(
            "{} index pointer has length {}, expected {}",
            name,
            indptr.len(),
            n_owner + 1
        )));
    }
    if indptr[0] != 0 || indptr.windows(2).any(|w| w[0] > w[1]) {
        return Err(invalid(format!(
            "{} index pointer must start at zero and be non-decreasing",
            name
        )));
    }
    if let Some(count) = count {
        if last(indptr) != count {
            return Err(invalid(format!(
                "{} index pointer ends at {}, expected {}",
                name,
                last(indptr),
                count
            )));
        }
    }
    Ok(())
}
