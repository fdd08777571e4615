//! Two-stage convergence pipeline: warm-start a density-fitted solver at
//! loose tolerance, then refine with the Newton-Raphson solver seeded from
//! its state.
//!
//! The refined solver is `newton(density_fit(base))`. Unless the caller
//! supplies a seed, a second, plainly density-fitted solver runs first with
//! loosened tolerances and a level shift; its orbitals and its auxiliary
//! tensor (shared by reference, never rebuilt) seed the refinement. The
//! final state is copied back onto the caller's handle, which is then
//! finalized so repeated `solve` calls return the cached energy.

use nalgebra::DMatrix;
use tracing::{info, warn};

use crate::decorate::{density_fit, newton, AuxBasisSpec};
use crate::solver::{InitialGuess, IntegrationGrid, NumericalIntegrator, SolverHandle};

/// Configuration of the pipeline. All warm-start numbers are deliberately
/// explicit fields rather than constants buried at the use site.
#[derive(Debug, Clone)]
pub struct FastNewtonOptions {
    /// Auxiliary basis for both phases. Defaults to the even-tempered set
    /// of [`AuxBasisSpec::even_tempered_default`].
    pub auxbasis: Option<AuxBasisSpec>,
    /// Seed density matrix. Takes precedence over `initial_orbitals` when
    /// both are given.
    pub initial_density: Option<DMatrix<f64>>,
    /// Seed orbitals and occupations. Skips the warm-start phase.
    pub initial_orbitals: Option<InitialGuess>,
    /// Energy tolerance of the warm-start solve.
    pub warm_conv_tol: f64,
    /// Gradient tolerance of the warm-start solve.
    pub warm_conv_tol_grad: f64,
    /// Level shift injected into the warm start when the base solver
    /// requests none.
    pub warm_level_shift: f64,
    /// Density cutoff applied to the coarsened warm-start grid.
    pub small_rho_cutoff: f64,
}

impl Default for FastNewtonOptions {
    fn default() -> FastNewtonOptions {
        FastNewtonOptions {
            auxbasis: None,
            initial_density: None,
            initial_orbitals: None,
            warm_conv_tol: 0.25,
            warm_conv_tol_grad: 0.5,
            warm_level_shift: 0.3,
            small_rho_cutoff: 1e-5,
        }
    }
}

/// Diagnostics of the warm-start phase. Absent when a caller-supplied seed
/// skipped the phase.
#[derive(Debug, Clone)]
pub struct WarmStartSummary {
    pub converged: bool,
    pub e_tot: f64,
    /// Level shift the warm start actually ran with.
    pub level_shift: f64,
    /// Whether the warm start's auxiliary tensor was handed to the refined
    /// solver by reference.
    pub cache_shared: bool,
}

/// Outcome of the pipeline. `converged` and `e_tot` mirror the state
/// written back onto the caller's handle.
#[derive(Debug, Clone)]
pub struct FastNewtonReport {
    pub converged: bool,
    pub e_tot: f64,
    pub warm_start: Option<WarmStartSummary>,
}

/// Run the combined warm-start + Newton refinement solve on `mf`.
///
/// On return `mf` carries the refined results and is finalized: further
/// `solve` calls are no-ops returning the cached energy. A non-converged
/// warm start is tolerated (the refinement still runs); a non-converged
/// refinement surfaces through the final `converged` flag.
pub fn fast_newton(mf: &mut SolverHandle, opts: FastNewtonOptions) -> FastNewtonReport {
    let auxbasis = opts
        .auxbasis
        .clone()
        .unwrap_or_else(AuxBasisSpec::even_tempered_default);

    let mut refined = newton(density_fit(mf.clone(), auxbasis.clone(), None));

    // grid-based solvers get a coarsened grid and a matching evaluator for
    // both phases; solvers without the capability skip this entirely
    let approx = mf.integration().map(|_| {
        let grid = IntegrationGrid::for_level(0);
        let numint = NumericalIntegrator::for_grid(&grid);
        (grid, numint)
    });
    if let Some((grid, numint)) = &approx {
        refined.set_integration(grid.clone(), numint.clone());
    }

    let mut warm_start = None;
    let guess = if let Some(dm) = &opts.initial_density {
        Some(refined.guess_from_density(dm))
    } else if let Some(seed) = &opts.initial_orbitals {
        Some(seed.clone())
    } else {
        info!("========================================================");
        info!("Generating initial guess with DIIS-SCF for newton solver");
        info!("========================================================");
        let mut warm = density_fit(mf.clone(), auxbasis, None);
        warm.params.conv_tol = opts.warm_conv_tol;
        warm.params.conv_tol_grad = opts.warm_conv_tol_grad;
        if warm.params.level_shift == 0.0 {
            warm.params.level_shift = opts.warm_level_shift;
        }
        if let Some((grid, numint)) = &approx {
            let mut coarse = grid.clone();
            coarse.small_rho_cutoff = opts.small_rho_cutoff;
            warm.set_integration(coarse, numint.clone());
        }

        let (warm_converged, warm_energy) = warm.solve(None);
        if !warm_converged {
            warn!("warm-start solve did not converge; refining from its last state anyway");
        }

        // hand the populated auxiliary tensor to the refined solver by
        // reference so it is never rebuilt
        let cache = warm.aux_cache();
        let cache_shared = cache.is_some();
        if let Some(cache) = cache {
            refined.adopt_aux_cache(cache);
        }

        warm_start = Some(WarmStartSummary {
            converged: warm_converged,
            e_tot: warm_energy,
            level_shift: warm.params.level_shift,
            cache_shared,
        });
        info!("============================");
        info!("Generating initial guess end");
        info!("============================");

        Some(InitialGuess {
            mo_coeff: warm.results.mo_coeff.clone(),
            mo_occ: warm.results.mo_occ.clone(),
        })
    };

    refined.solve(guess.as_ref());

    mf.results = refined.results.clone();
    mf.finalize();

    FastNewtonReport {
        converged: mf.results.converged,
        e_tot: mf.results.e_tot,
        warm_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::{rhf, rks, uhf};
    use crate::system::MolecularSystem;

    #[test]
    fn accelerated_and_plain_paths_agree() {
        let sys = MolecularSystem::new(2, 0);

        let mut plain = rhf(&sys);
        let (plain_converged, e_plain) = plain.solve(None);
        assert!(plain_converged);

        let mut fast = rhf(&sys);
        let report = fast_newton(&mut fast, FastNewtonOptions::default());
        assert!(report.converged);
        let warm = report.warm_start.expect("no seed given, warm start runs");
        assert!(warm.cache_shared);
        assert!((report.e_tot - e_plain).abs() < 1e-6);
        assert_eq!(fast.results.e_tot, report.e_tot);
    }

    #[test]
    fn supplied_orbitals_skip_the_warm_start() {
        let sys = MolecularSystem::new(4, 0);

        let mut seed_source = rhf(&sys);
        seed_source.solve(None);
        let seed = InitialGuess {
            mo_coeff: seed_source.results.mo_coeff.clone(),
            mo_occ: seed_source.results.mo_occ.clone(),
        };

        let mut mf = rhf(&sys);
        let report = fast_newton(
            &mut mf,
            FastNewtonOptions {
                initial_orbitals: Some(seed),
                ..FastNewtonOptions::default()
            },
        );
        assert!(report.converged);
        assert!(report.warm_start.is_none());
    }

    #[test]
    fn density_seed_takes_precedence_and_skips_the_warm_start() {
        let sys = MolecularSystem::new(2, 0);
        let mut reference = rhf(&sys);
        reference.solve(None);

        let n = reference.nbasis();
        let mut dm = DMatrix::zeros(n, n);
        dm[(0, 0)] = 2.0;

        let mut seed_source = rhf(&sys);
        seed_source.solve(None);
        let orbitals = InitialGuess {
            mo_coeff: seed_source.results.mo_coeff.clone(),
            mo_occ: seed_source.results.mo_occ.clone(),
        };

        let mut mf = rhf(&sys);
        let report = fast_newton(
            &mut mf,
            FastNewtonOptions {
                initial_density: Some(dm),
                initial_orbitals: Some(orbitals),
                ..FastNewtonOptions::default()
            },
        );
        assert!(report.warm_start.is_none());
        assert!(report.converged);
        assert!((report.e_tot - reference.results.e_tot).abs() < 1e-6);
    }

    #[test]
    fn level_shift_is_injected_only_when_unset() {
        let sys = MolecularSystem::new(4, 0);

        let mut unshifted = rhf(&sys);
        let report = fast_newton(&mut unshifted, FastNewtonOptions::default());
        assert_eq!(report.warm_start.unwrap().level_shift, 0.3);

        let mut shifted = rhf(&sys);
        shifted.params.level_shift = 0.1;
        let report = fast_newton(&mut shifted, FastNewtonOptions::default());
        assert_eq!(report.warm_start.unwrap().level_shift, 0.1);
    }

    #[test]
    fn pipeline_without_grid_capability_skips_coarsening() {
        let sys = MolecularSystem::new(3, 1);
        let mut mf = uhf(&sys);
        assert!(mf.integration().is_none());
        let report = fast_newton(&mut mf, FastNewtonOptions::default());
        assert!(report.converged);
    }

    #[test]
    fn grid_based_pipeline_converges_to_the_plain_result() {
        let sys = MolecularSystem::new(2, 0);

        let mut plain = rks(&sys);
        let (converged, e_plain) = plain.solve(None);
        assert!(converged);

        let mut fast = rks(&sys);
        let report = fast_newton(&mut fast, FastNewtonOptions::default());
        assert!(report.converged);
        assert!((report.e_tot - e_plain).abs() < 1e-6);
        // the caller's own grid is untouched by the coarsened phases
        let (grid, _) = fast.integration().unwrap();
        assert_eq!(grid.level, 3);
    }

    #[test]
    fn finalized_handle_is_idempotent() {
        let sys = MolecularSystem::new(2, 0);
        let mut mf = rhf(&sys);
        let report = fast_newton(&mut mf, FastNewtonOptions::default());

        let coeff = mf.results.mo_coeff.clone();
        let occ = mf.results.mo_occ.clone();
        let (converged, energy) = mf.solve(None);
        assert!(converged);
        assert_eq!(energy, report.e_tot);
        assert_eq!(mf.results.mo_coeff, coeff);
        assert_eq!(mf.results.mo_occ, occ);
    }
}
