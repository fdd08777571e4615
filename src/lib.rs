//! Mean-field solver dispatch and convergence orchestration.
//!
//! This crate selects the concrete mean-field solver variant for a molecular
//! system (restricted, restricted-open-shell, unrestricted, relativistic,
//! symmetry-adapted, one-electron), decorates it with density fitting and
//! Newton-Raphson refinement, and drives the two-stage convergence pipeline
//! that warm-starts the Newton solver from a cheap loose-tolerance solve.
//!
//! ```
//! use scf_driver::{fast_newton, rhf, FastNewtonOptions, MolecularSystem};
//!
//! let h2 = MolecularSystem::new(2, 0);
//! let mut mf = rhf(&h2);
//! let report = fast_newton(&mut mf, FastNewtonOptions::default());
//! assert!(report.converged);
//! ```

pub mod config;
pub mod decorate;
pub mod io;
pub mod kernels;
pub mod pipeline;
pub mod select;
pub mod solver;
pub mod system;

pub use decorate::{density_fit, newton, AuxBasisSpec};
pub use pipeline::{fast_newton, FastNewtonOptions, FastNewtonReport, WarmStartSummary};
pub use select::{
    dhf, rhf, rks, rohf, select_dhf, select_rhf, select_rohf, select_uhf, uhf, uks, SolverVariant,
};
pub use solver::{InitialGuess, ScfParams, SolveResults, SolverHandle};
pub use system::{MolecularSystem, PointGroup};
