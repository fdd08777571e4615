//! Method selection: mapping a molecular system onto the concrete
//! mean-field solver variant.
//!
//! The selectors are total, deterministic functions over
//! (electron count, spin, point-group symmetry); they never fail. The
//! lowercase constructors (`rhf`, `uhf`, ...) run the same selection and
//! return a ready [`SolverHandle`].

use crate::kernels::{grid_kernel_for, kernel_for};
use crate::solver::{IntegrationGrid, NumericalIntegrator, SolverHandle};
use crate::system::MolecularSystem;

/// Default grid level for the density-functional style constructors.
const DEFAULT_GRID_LEVEL: u8 = 3;

/// Concrete solver variant identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverVariant {
    Rhf,
    Rohf,
    Uhf,
    SymRhf,
    SymRohf,
    SymUhf,
    OneElectron,
    SymOneElectron,
    Dhf,
    DhfOneElectron,
}

impl SolverVariant {
    pub fn is_symmetry_adapted(&self) -> bool {
        matches!(
            self,
            SolverVariant::SymRhf
                | SolverVariant::SymRohf
                | SolverVariant::SymUhf
                | SolverVariant::SymOneElectron
        )
    }

    /// The symmetry-adapted counterpart of this variant. The Dirac solvers
    /// have none and map to themselves.
    pub fn symmetry_counterpart(&self) -> SolverVariant {
        match self {
            SolverVariant::Rhf => SolverVariant::SymRhf,
            SolverVariant::Rohf => SolverVariant::SymRohf,
            SolverVariant::Uhf => SolverVariant::SymUhf,
            SolverVariant::OneElectron => SolverVariant::SymOneElectron,
            other => *other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SolverVariant::Rhf => "RHF",
            SolverVariant::Rohf => "ROHF",
            SolverVariant::Uhf => "UHF",
            SolverVariant::SymRhf => "RHF (symmetry-adapted)",
            SolverVariant::SymRohf => "ROHF (symmetry-adapted)",
            SolverVariant::SymUhf => "UHF (symmetry-adapted)",
            SolverVariant::OneElectron => "one-electron HF",
            SolverVariant::SymOneElectron => "one-electron HF (symmetry-adapted)",
            SolverVariant::Dhf => "Dirac-HF",
            SolverVariant::DhfOneElectron => "one-electron Dirac-HF",
        }
    }
}

/// Restricted family: closed-shell RHF, falling back to ROHF for open
/// shells and to the one-electron solver for a single electron.
pub fn select_rhf(system: &MolecularSystem) -> SolverVariant {
    if system.electron_count() == 1 {
        if system.has_nontrivial_symmetry() {
            SolverVariant::SymOneElectron
        } else {
            SolverVariant::OneElectron
        }
    } else if !system.has_nontrivial_symmetry() {
        if system.spin() > 0 {
            SolverVariant::Rohf
        } else {
            SolverVariant::Rhf
        }
    } else if system.spin() > 0 {
        SolverVariant::SymRohf
    } else {
        SolverVariant::SymRhf
    }
}

/// Restricted-open-shell family.
pub fn select_rohf(system: &MolecularSystem) -> SolverVariant {
    if system.electron_count() == 1 {
        if system.has_nontrivial_symmetry() {
            SolverVariant::SymOneElectron
        } else {
            SolverVariant::OneElectron
        }
    } else if !system.has_nontrivial_symmetry() {
        SolverVariant::Rohf
    } else {
        SolverVariant::SymRohf
    }
}

/// Unrestricted family. A single electron has no open-/closed-shell
/// distinction, so it reuses the restricted one-electron routing.
pub fn select_uhf(system: &MolecularSystem) -> SolverVariant {
    if system.electron_count() == 1 {
        select_rhf(system)
    } else if !system.has_nontrivial_symmetry() {
        SolverVariant::Uhf
    } else {
        SolverVariant::SymUhf
    }
}

/// Relativistic family. Point-group symmetry is ignored here.
pub fn select_dhf(system: &MolecularSystem) -> SolverVariant {
    if system.electron_count() == 1 {
        SolverVariant::DhfOneElectron
    } else {
        SolverVariant::Dhf
    }
}

fn build(system: &MolecularSystem, variant: SolverVariant) -> SolverHandle {
    SolverHandle::new(system.clone(), variant, kernel_for(variant))
}

fn build_with_grid(system: &MolecularSystem, variant: SolverVariant) -> SolverHandle {
    let mut handle = SolverHandle::new(system.clone(), variant, grid_kernel_for(variant));
    let grid = IntegrationGrid::for_level(DEFAULT_GRID_LEVEL);
    let numint = NumericalIntegrator::for_grid(&grid);
    handle.set_integration(grid, numint);
    handle
}

pub fn rhf(system: &MolecularSystem) -> SolverHandle {
    build(system, select_rhf(system))
}

pub fn rohf(system: &MolecularSystem) -> SolverHandle {
    build(system, select_rohf(system))
}

pub fn uhf(system: &MolecularSystem) -> SolverHandle {
    build(system, select_uhf(system))
}

pub fn dhf(system: &MolecularSystem) -> SolverHandle {
    build(system, select_dhf(system))
}

/// Grid-carrying restricted solver (Kohn-Sham style).
pub fn rks(system: &MolecularSystem) -> SolverHandle {
    build_with_grid(system, select_rhf(system))
}

/// Grid-carrying unrestricted solver (Kohn-Sham style).
pub fn uks(system: &MolecularSystem) -> SolverHandle {
    build_with_grid(system, select_uhf(system))
}
