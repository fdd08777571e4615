//! Decoration layer: density fitting and Newton-Raphson refinement.
//!
//! Decorations are kernel adapters implementing [`ScfKernel`] and delegating
//! to the wrapped kernel, so they compose as an explicit ordered stack and
//! stay transparent to the handle's result surface. Order matters: the
//! Newton wrapper goes on top of density fitting, so the Newton step still
//! sees the fitted two-electron approximation underneath.

use std::sync::Arc;
use tracing::info;

use crate::solver::{
    AuxTensorCache, KernelInput, ScfKernel, SharedAuxCache, SolveResults, SolverHandle, StepMode,
};
use crate::system::MolecularSystem;

/// Auxiliary-basis specification for density fitting.
#[derive(Debug, Clone, PartialEq)]
pub enum AuxBasisSpec {
    /// A named fitting set, e.g. "weigend+etb".
    Named(String),
    /// Even-tempered set derived from a parent basis with extrapolation
    /// exponent `beta`.
    EvenTempered { base: String, beta: f64 },
}

impl AuxBasisSpec {
    pub fn named(name: &str) -> AuxBasisSpec {
        AuxBasisSpec::Named(name.to_string())
    }

    /// Default fitting set for a plain density-fitted solver.
    pub fn default_fit() -> AuxBasisSpec {
        AuxBasisSpec::named("weigend+etb")
    }

    /// Even-tempered default used by the convergence pipeline, sized for
    /// accuracy rather than speed.
    pub fn even_tempered_default() -> AuxBasisSpec {
        AuxBasisSpec::EvenTempered {
            base: "ahlrichs".to_string(),
            beta: 2.5,
        }
    }

    /// Number of auxiliary functions for an orbital basis of size `nbasis`.
    /// Named production sets run roughly three times the orbital basis;
    /// even-tempered sets scale with the extrapolation exponent.
    pub fn aux_dimension(&self, nbasis: usize) -> usize {
        match self {
            AuxBasisSpec::Named(_) => 3 * nbasis,
            AuxBasisSpec::EvenTempered { beta, .. } => {
                (nbasis as f64 * (1.0 + beta)).ceil() as usize
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AuxBasisSpec::Named(name) => name.clone(),
            AuxBasisSpec::EvenTempered { base, beta } => {
                format!("even-tempered({}, beta={})", base, beta)
            }
        }
    }
}

/// Replaces the wrapped kernel's two-electron evaluation with the
/// auxiliary-basis approximation. The tensor cache is built lazily on the
/// first run, or adopted by reference from another fitted solver.
#[derive(Clone)]
pub(crate) struct DensityFitting {
    inner: Box<dyn ScfKernel>,
    auxbasis: AuxBasisSpec,
    cache: Option<SharedAuxCache>,
}

impl DensityFitting {
    fn ensure_cache(&mut self, system: &MolecularSystem) -> SharedAuxCache {
        match &self.cache {
            Some(cache) => cache.clone(),
            None => {
                info!(
                    "building auxiliary two-electron tensor: {}",
                    self.auxbasis.describe()
                );
                let cache = Arc::new(self.inner.build_aux_cache(&self.auxbasis, system));
                self.cache = Some(cache.clone());
                cache
            }
        }
    }
}

impl ScfKernel for DensityFitting {
    fn name(&self) -> String {
        format!("density_fit({})", self.inner.name())
    }

    fn nbasis(&self, system: &MolecularSystem) -> usize {
        self.inner.nbasis(system)
    }

    fn run(&mut self, mut input: KernelInput<'_>) -> SolveResults {
        input.aux = Some(self.ensure_cache(input.system));
        self.inner.run(input)
    }

    fn build_aux_cache(&self, spec: &AuxBasisSpec, system: &MolecularSystem) -> AuxTensorCache {
        self.inner.build_aux_cache(spec, system)
    }

    fn boxed_clone(&self) -> Box<dyn ScfKernel> {
        Box::new(self.clone())
    }

    fn aux_cache(&self) -> Option<SharedAuxCache> {
        self.cache.clone()
    }

    fn adopt_aux_cache(&mut self, cache: SharedAuxCache) {
        self.cache = Some(cache);
    }

    fn grid_aware(&self) -> bool {
        self.inner.grid_aware()
    }
}

/// Switches the wrapped kernel's self-consistency step to the
/// augmented-Hessian Newton-Raphson mode. Everything else delegates, so a
/// fitting decoration underneath stays in effect.
#[derive(Clone)]
pub(crate) struct NewtonRefinement {
    inner: Box<dyn ScfKernel>,
}

impl ScfKernel for NewtonRefinement {
    fn name(&self) -> String {
        format!("newton_ah({})", self.inner.name())
    }

    fn nbasis(&self, system: &MolecularSystem) -> usize {
        self.inner.nbasis(system)
    }

    fn run(&mut self, mut input: KernelInput<'_>) -> SolveResults {
        input.step = StepMode::NewtonAh;
        self.inner.run(input)
    }

    fn build_aux_cache(&self, spec: &AuxBasisSpec, system: &MolecularSystem) -> AuxTensorCache {
        self.inner.build_aux_cache(spec, system)
    }

    fn boxed_clone(&self) -> Box<dyn ScfKernel> {
        Box::new(self.clone())
    }

    fn aux_cache(&self) -> Option<SharedAuxCache> {
        self.inner.aux_cache()
    }

    fn adopt_aux_cache(&mut self, cache: SharedAuxCache) {
        self.inner.adopt_aux_cache(cache);
    }

    fn grid_aware(&self) -> bool {
        self.inner.grid_aware()
    }
}

/// Attach the density-fitting approximation to a solver. Supplying
/// `with_df` reuses an already-built tensor cache by reference instead of
/// rebuilding it. The solver's convergence results are untouched.
pub fn density_fit(
    mut solver: SolverHandle,
    auxbasis: AuxBasisSpec,
    with_df: Option<SharedAuxCache>,
) -> SolverHandle {
    let inner = solver.kernel;
    solver.kernel = Box::new(DensityFitting {
        inner,
        auxbasis,
        cache: with_df,
    });
    solver
}

/// Attach the augmented-Hessian Newton-Raphson refinement to a solver.
pub fn newton(mut solver: SolverHandle) -> SolverHandle {
    let inner = solver.kernel;
    solver.kernel = Box::new(NewtonRefinement { inner });
    solver
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::rhf;
    use crate::system::MolecularSystem;

    #[test]
    fn decorations_compose_in_order() {
        let sys = MolecularSystem::new(2, 0);
        let mf = newton(density_fit(rhf(&sys), AuxBasisSpec::default_fit(), None));
        assert_eq!(mf.kernel_name(), "newton_ah(density_fit(rhf))");
    }

    #[test]
    fn cache_is_built_lazily_and_only_once() {
        let sys = MolecularSystem::new(4, 0);
        let mut mf = density_fit(rhf(&sys), AuxBasisSpec::default_fit(), None);
        assert!(mf.aux_cache().is_none());

        mf.solve(None);
        let first = mf.aux_cache().expect("cache built on first solve");
        assert_eq!(first.naoaux, AuxBasisSpec::default_fit().aux_dimension(mf.nbasis()));

        mf.solve(None);
        let second = mf.aux_cache().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn supplied_cache_is_reused_by_reference() {
        let sys = MolecularSystem::new(4, 0);
        let spec = AuxBasisSpec::even_tempered_default();

        let mut first = density_fit(rhf(&sys), spec.clone(), None);
        first.solve(None);
        let cache = first.aux_cache().unwrap();

        let mut second = density_fit(rhf(&sys), spec, Some(cache.clone()));
        second.solve(None);
        assert!(Arc::ptr_eq(&cache, &second.aux_cache().unwrap()));
    }

    #[test]
    fn newton_wrapper_reaches_the_fitting_layer_underneath() {
        let sys = MolecularSystem::new(4, 0);
        let mut mf = newton(density_fit(
            rhf(&sys),
            AuxBasisSpec::even_tempered_default(),
            None,
        ));
        assert!(mf.aux_cache().is_none());
        mf.solve(None);
        // the fitting layer below the Newton wrapper owns the cache
        let cache = mf.aux_cache().expect("cache visible through newton wrapper");

        let adopted = Arc::new(AuxTensorCache {
            naoaux: cache.naoaux,
            cderi: cache.cderi.clone(),
        });
        mf.adopt_aux_cache(adopted.clone());
        assert!(Arc::ptr_eq(&adopted, &mf.aux_cache().unwrap()));
    }

    #[test]
    fn fitted_solve_matches_plain_solve() {
        let sys = MolecularSystem::new(4, 0);
        let mut plain = rhf(&sys);
        let (_, e_plain) = plain.solve(None);

        let mut fitted = density_fit(rhf(&sys), AuxBasisSpec::even_tempered_default(), None);
        let (converged, e_fitted) = fitted.solve(None);
        assert!(converged);
        assert!((e_fitted - e_plain).abs() < 1e-8);
    }

    #[test]
    fn decoration_preserves_existing_results() {
        let sys = MolecularSystem::new(2, 0);
        let mut mf = rhf(&sys);
        mf.solve(None);
        let results = mf.results.clone();
        let decorated = density_fit(mf, AuxBasisSpec::default_fit(), None);
        assert_eq!(decorated.results, results);
    }
}
