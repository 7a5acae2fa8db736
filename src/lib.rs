mod dense;
mod error;
mod math;
mod measured_values;
mod options;
mod params;
mod solver_output;
mod sparse_lu;
mod tensor;
mod timer;
mod topology;
mod ybus;

pub mod debug;
pub mod dispatch;
pub mod linear_pf;
pub mod math_solver;
pub mod newton_pf;
pub mod newton_se;
pub mod short_circuit;

pub use dense::*;
pub use error::*;
pub use math::*;
pub use measured_values::*;
pub use options::*;
pub use params::*;
pub use solver_output::*;
pub use sparse_lu::*;
pub use tensor::*;
pub use timer::*;
pub use topology::*;
pub use ybus::*;

pub use dispatch::{MathSolverDispatcher, MathSolverImpl, MathSolverProxy};
pub use math_solver::MathSolver;

#[cfg(test)]
mod tests;
