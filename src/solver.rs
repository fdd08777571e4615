//! Solver handles and the kernel seam.
//!
//! A [`SolverHandle`] is the mutable record of one mean-field solve: its
//! parameters, its result surface (`converged`, `e_tot`, `mo_energy`,
//! `mo_coeff`, `mo_occ`) and a small solve-phase state machine. The numeric
//! work itself (Fock builds, integrals, DIIS extrapolation, the Newton-AH
//! step) lives behind the [`ScfKernel`] trait; the handle only drives it.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use std::sync::Arc;
use tracing::warn;

use crate::decorate::AuxBasisSpec;
use crate::select::SolverVariant;
use crate::system::MolecularSystem;

/// Convergence and stabilization parameters for one solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScfParams {
    /// Energy convergence threshold in Hartree.
    pub conv_tol: f64,
    /// Orbital-gradient convergence threshold.
    pub conv_tol_grad: f64,
    /// Maximum number of self-consistency cycles.
    pub max_cycle: usize,
    /// Level shift (in AU) applied to virtual orbitals. Zero disables it.
    pub level_shift: f64,
    /// Weight of the new density in the damped fixed-point update.
    pub density_mixing: f64,
}

impl Default for ScfParams {
    fn default() -> ScfParams {
        ScfParams {
            conv_tol: 1e-9,
            conv_tol_grad: 1e-5,
            max_cycle: 50,
            level_shift: 0.0,
            density_mixing: 0.5,
        }
    }
}

/// Orbital coefficients. Non-relativistic solvers produce real matrices,
/// the Dirac solvers complex spinor coefficients.
#[derive(Debug, Clone, PartialEq)]
pub enum OrbitalMatrix {
    Real(DMatrix<f64>),
    Complex(DMatrix<Complex64>),
}

impl OrbitalMatrix {
    pub fn empty() -> OrbitalMatrix {
        OrbitalMatrix::Real(DMatrix::zeros(0, 0))
    }

    pub fn nrows(&self) -> usize {
        match self {
            OrbitalMatrix::Real(m) => m.nrows(),
            OrbitalMatrix::Complex(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            OrbitalMatrix::Real(m) => m.ncols(),
            OrbitalMatrix::Complex(m) => m.ncols(),
        }
    }

    pub fn as_real(&self) -> Option<&DMatrix<f64>> {
        match self {
            OrbitalMatrix::Real(m) => Some(m),
            OrbitalMatrix::Complex(_) => None,
        }
    }

    pub fn as_complex(&self) -> Option<&DMatrix<Complex64>> {
        match self {
            OrbitalMatrix::Complex(m) => Some(m),
            OrbitalMatrix::Real(_) => None,
        }
    }
}

/// Terminal (or in-progress) state of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResults {
    pub converged: bool,
    pub e_tot: f64,
    pub mo_energy: DVector<f64>,
    pub mo_coeff: OrbitalMatrix,
    pub mo_occ: DVector<f64>,
}

impl SolveResults {
    pub fn empty() -> SolveResults {
        SolveResults {
            converged: false,
            e_tot: 0.0,
            mo_energy: DVector::zeros(0),
            mo_coeff: OrbitalMatrix::empty(),
            mo_occ: DVector::zeros(0),
        }
    }
}

/// Solve-phase state machine. A handle finalized by the convergence
/// pipeline refuses to re-run and serves its cached results instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvePhase {
    Unsolved,
    Solving,
    Finalized,
}

/// Orbital seed handed to a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialGuess {
    pub mo_coeff: OrbitalMatrix,
    pub mo_occ: DVector<f64>,
}

/// Auxiliary-basis two-electron tensor, shared by reference between a
/// warm-start solver and the refined solver so it is built at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxTensorCache {
    /// Number of auxiliary functions.
    pub naoaux: usize,
    /// Three-center Cholesky-style factor, shape (naoaux, nbasis).
    pub cderi: DMatrix<f64>,
}

pub type SharedAuxCache = Arc<AuxTensorCache>;

impl AuxTensorCache {
    /// Contract the fitted two-electron tensor with a real density matrix.
    pub fn contract(&self, density: &DMatrix<f64>) -> DMatrix<f64> {
        self.cderi.transpose() * (&self.cderi * density)
    }

    /// Contraction for complex (four-component) densities.
    pub fn contract_complex(&self, density: &DMatrix<Complex64>) -> DMatrix<Complex64> {
        let metric = (self.cderi.transpose() * &self.cderi).map(Complex64::from);
        metric * density
    }
}

/// Numerical-integration grid for density-functional style solvers.
/// Level 0 is the coarsest grid the pipeline uses for its approximate phase.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationGrid {
    pub level: u8,
    pub n_points: usize,
    /// Densities below this value are dropped from the quadrature.
    pub small_rho_cutoff: f64,
}

impl IntegrationGrid {
    pub fn for_level(level: u8) -> IntegrationGrid {
        IntegrationGrid {
            level,
            n_points: 128 << (2 * level as usize),
            small_rho_cutoff: 1e-7,
        }
    }
}

/// Copyable numerical-integration evaluator paired with a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericalIntegrator {
    pub grid_level: u8,
}

impl NumericalIntegrator {
    pub fn for_grid(grid: &IntegrationGrid) -> NumericalIntegrator {
        NumericalIntegrator {
            grid_level: grid.level,
        }
    }
}

/// Which self-consistency step the kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Damped fixed-point iteration (the robust default).
    FixedPoint,
    /// Augmented-Hessian Newton-Raphson step. Quadratic locally, but needs
    /// a seed inside its convergence radius.
    NewtonAh,
}

/// Everything a kernel needs for one run to convergence. Decoration
/// adapters rewrite fields of this input before delegating inward.
pub struct KernelInput<'a> {
    pub system: &'a MolecularSystem,
    pub params: ScfParams,
    pub guess: Option<&'a InitialGuess>,
    pub grid: Option<&'a IntegrationGrid>,
    pub numint: Option<&'a NumericalIntegrator>,
    pub aux: Option<SharedAuxCache>,
    pub step: StepMode,
}

/// Seam to the numeric collaborators. One implementation per solver
/// variant, plus the decoration adapters that wrap and delegate.
pub trait ScfKernel: Send {
    /// Composed kernel name, e.g. `newton_ah(density_fit(rhf))`.
    fn name(&self) -> String;

    /// Orbital-basis dimension for the given system.
    fn nbasis(&self, system: &MolecularSystem) -> usize;

    /// Run the self-consistency loop to convergence (or to `max_cycle`).
    fn run(&mut self, input: KernelInput<'_>) -> SolveResults;

    /// Build the auxiliary-basis tensor for a density-fitted run.
    fn build_aux_cache(&self, spec: &AuxBasisSpec, system: &MolecularSystem) -> AuxTensorCache;

    fn boxed_clone(&self) -> Box<dyn ScfKernel>;

    /// The shared auxiliary tensor, if a fitting adapter has built one.
    fn aux_cache(&self) -> Option<SharedAuxCache> {
        None
    }

    /// Adopt an already-built auxiliary tensor instead of rebuilding it.
    fn adopt_aux_cache(&mut self, _cache: SharedAuxCache) {}

    /// Whether this kernel integrates on a numerical grid.
    fn grid_aware(&self) -> bool {
        false
    }
}

impl Clone for Box<dyn ScfKernel> {
    fn clone(&self) -> Box<dyn ScfKernel> {
        self.boxed_clone()
    }
}

/// One mean-field solve in progress or completed.
#[derive(Clone)]
pub struct SolverHandle {
    variant: SolverVariant,
    system: MolecularSystem,
    pub params: ScfParams,
    pub results: SolveResults,
    pub(crate) kernel: Box<dyn ScfKernel>,
    phase: SolvePhase,
    integration: Option<(IntegrationGrid, NumericalIntegrator)>,
}

impl SolverHandle {
    pub fn new(
        system: MolecularSystem,
        variant: SolverVariant,
        kernel: Box<dyn ScfKernel>,
    ) -> SolverHandle {
        SolverHandle {
            variant,
            system,
            params: ScfParams::default(),
            results: SolveResults::empty(),
            kernel,
            phase: SolvePhase::Unsolved,
            integration: None,
        }
    }

    pub fn variant(&self) -> SolverVariant {
        self.variant
    }

    pub fn system(&self) -> &MolecularSystem {
        &self.system
    }

    pub fn phase(&self) -> SolvePhase {
        self.phase
    }

    pub fn kernel_name(&self) -> String {
        self.kernel.name()
    }

    pub fn nbasis(&self) -> usize {
        self.kernel.nbasis(&self.system)
    }

    /// Numerical-integration capability. `None` for solvers that do not
    /// integrate on a grid; the pipeline skips grid coarsening for those.
    pub fn integration(&self) -> Option<&(IntegrationGrid, NumericalIntegrator)> {
        self.integration.as_ref()
    }

    pub fn set_integration(&mut self, grid: IntegrationGrid, numint: NumericalIntegrator) {
        self.integration = Some((grid, numint));
    }

    pub fn aux_cache(&self) -> Option<SharedAuxCache> {
        self.kernel.aux_cache()
    }

    pub fn adopt_aux_cache(&mut self, cache: SharedAuxCache) {
        self.kernel.adopt_aux_cache(cache);
    }

    /// Run the solve. On a handle finalized by the convergence pipeline
    /// this is a no-op that returns the cached energy.
    pub fn solve(&mut self, guess: Option<&InitialGuess>) -> (bool, f64) {
        if self.phase == SolvePhase::Finalized {
            warn!(
                "{}: solver already finalized by the convergence pipeline; \
                 returning the cached energy instead of re-solving",
                self.kernel.name()
            );
            return (self.results.converged, self.results.e_tot);
        }
        self.phase = SolvePhase::Solving;
        let input = KernelInput {
            system: &self.system,
            params: self.params,
            guess,
            grid: self.integration.as_ref().map(|(g, _)| g),
            numint: self.integration.as_ref().map(|(_, n)| n),
            aux: None,
            step: StepMode::FixedPoint,
        };
        self.results = self.kernel.run(input);
        self.phase = SolvePhase::Unsolved;
        (self.results.converged, self.results.e_tot)
    }

    /// Mark the handle terminal. Subsequent `solve` calls return the
    /// cached results.
    pub fn finalize(&mut self) {
        self.phase = SolvePhase::Finalized;
    }

    /// Project an initial density matrix onto an orbital guess: natural
    /// orbitals of the density, occupied in order of decreasing occupation.
    pub fn guess_from_density(&self, density: &DMatrix<f64>) -> InitialGuess {
        let eig = nalgebra::SymmetricEigen::new(density.clone());
        let mut indices: Vec<usize> = (0..eig.eigenvalues.len()).collect();
        indices.sort_by(|&a, &b| {
            eig.eigenvalues[b]
                .partial_cmp(&eig.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let occ = DVector::from_fn(eig.eigenvalues.len(), |i, _| {
            eig.eigenvalues[indices[i]].max(0.0)
        });
        let coeff = eig.eigenvectors.select_columns(&indices);
        InitialGuess {
            mo_coeff: OrbitalMatrix::Real(coeff),
            mo_occ: occ,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::rhf;
    use crate::system::MolecularSystem;

    #[test]
    fn default_params() {
        let p = ScfParams::default();
        assert_eq!(p.conv_tol, 1e-9);
        assert_eq!(p.level_shift, 0.0);
        assert_eq!(p.max_cycle, 50);
    }

    #[test]
    fn finalized_handle_serves_cached_results() {
        let sys = MolecularSystem::new(2, 0);
        let mut mf = rhf(&sys);
        let (converged, e_first) = mf.solve(None);
        assert!(converged);
        let coeff_before = mf.results.mo_coeff.clone();

        mf.finalize();
        let (converged_again, e_again) = mf.solve(None);
        assert!(converged_again);
        assert_eq!(e_again, e_first);
        assert_eq!(mf.results.mo_coeff, coeff_before);
        assert_eq!(mf.phase(), SolvePhase::Finalized);
    }

    #[test]
    fn density_projection_recovers_occupations() {
        let sys = MolecularSystem::new(2, 0);
        let mf = rhf(&sys);
        let n = mf.nbasis();

        // density of a single doubly occupied orbital along e_0
        let mut dm = DMatrix::zeros(n, n);
        dm[(0, 0)] = 2.0;
        let guess = mf.guess_from_density(&dm);
        assert!((guess.mo_occ[0] - 2.0).abs() < 1e-12);
        assert!(guess.mo_occ.iter().skip(1).all(|&o| o.abs() < 1e-12));
        assert_eq!(guess.mo_coeff.ncols(), n);
    }

    #[test]
    fn aux_contraction_matches_direct_model() {
        // full-rank factor: L^T L D must equal g D
        let n = 4;
        let g: f64 = 0.1;
        let cderi = DMatrix::from_fn(n, n, |i, j| if i == j { g.sqrt() } else { 0.0 });
        let cache = AuxTensorCache { naoaux: n, cderi };
        let d = DMatrix::from_fn(n, n, |i, j| 0.1 * (i + j) as f64);
        let j_fit = cache.contract(&d);
        let j_ref = d.map(|x| g * x);
        assert!((j_fit - j_ref).norm() < 1e-12);
    }
}
