//! Molecular system descriptor consumed by the method selector.
//!
//! This is a read-only snapshot of the invariants the dispatch layer cares
//! about: electron count, spin (n_alpha - n_beta) and point-group symmetry.
//! Geometry, basis sets and integrals live behind the kernel seam.

use periodic_table_on_an_enum::Element;
use std::collections::HashMap;

/// Point groups recognized by the symmetry-adapted solver variants.
///
/// `C1` is the trivial group; a system carrying `C1` behaves exactly like a
/// system with symmetry disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointGroup {
    C1,
    Ci,
    Cs,
    C2,
    C2v,
    C2h,
    D2,
    D2h,
    Coov,
    Dooh,
}

impl PointGroup {
    /// Parse a point-group label, case-insensitively.
    pub fn from_label(label: &str) -> Option<PointGroup> {
        match label.to_lowercase().as_str() {
            "c1" => Some(PointGroup::C1),
            "ci" => Some(PointGroup::Ci),
            "cs" => Some(PointGroup::Cs),
            "c2" => Some(PointGroup::C2),
            "c2v" => Some(PointGroup::C2v),
            "c2h" => Some(PointGroup::C2h),
            "d2" => Some(PointGroup::D2),
            "d2h" => Some(PointGroup::D2h),
            "coov" | "c*v" => Some(PointGroup::Coov),
            "dooh" | "d*h" => Some(PointGroup::Dooh),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PointGroup::C1 => "C1",
            PointGroup::Ci => "Ci",
            PointGroup::Cs => "Cs",
            PointGroup::C2 => "C2",
            PointGroup::C2v => "C2v",
            PointGroup::C2h => "C2h",
            PointGroup::D2 => "D2",
            PointGroup::D2h => "D2h",
            PointGroup::Coov => "Coov",
            PointGroup::Dooh => "Dooh",
        }
    }

    pub fn is_trivial(&self) -> bool {
        matches!(self, PointGroup::C1)
    }
}

/// Immutable molecular description read by the method selector.
#[derive(Debug, Clone)]
pub struct MolecularSystem {
    electron_count: usize,
    spin: i32,
    symmetry: Option<PointGroup>,
    irrep_electrons: Option<HashMap<String, usize>>,
}

impl MolecularSystem {
    pub fn new(electron_count: usize, spin: i32) -> MolecularSystem {
        MolecularSystem {
            electron_count,
            spin,
            symmetry: None,
            irrep_electrons: None,
        }
    }

    /// Build a system from its elements and total charge. Spin is the excess
    /// of alpha over beta electrons (2S), as in the multiplicity - 1.
    pub fn from_elements(elements: &[Element], charge: i32, spin: i32) -> MolecularSystem {
        let nuclear_charge: i32 = elements
            .iter()
            .map(|e| e.get_atomic_number() as i32)
            .sum();
        MolecularSystem::new((nuclear_charge - charge).max(0) as usize, spin)
    }

    /// Enable point-group symmetry.
    pub fn with_symmetry(mut self, group: PointGroup) -> MolecularSystem {
        self.symmetry = Some(group);
        self
    }

    /// Pin the electron distribution over irreducible representations.
    /// Only meaningful together with `with_symmetry`.
    pub fn with_irrep_electrons(mut self, map: HashMap<String, usize>) -> MolecularSystem {
        self.irrep_electrons = Some(map);
        self
    }

    pub fn electron_count(&self) -> usize {
        self.electron_count
    }

    pub fn spin(&self) -> i32 {
        self.spin
    }

    pub fn point_group(&self) -> Option<PointGroup> {
        self.symmetry
    }

    pub fn irrep_electrons(&self) -> Option<&HashMap<String, usize>> {
        self.irrep_electrons.as_ref()
    }

    pub fn symmetry_enabled(&self) -> bool {
        self.symmetry.is_some()
    }

    /// Symmetry is enabled and the group is not the trivial C1.
    pub fn has_nontrivial_symmetry(&self) -> bool {
        self.symmetry.map_or(false, |g| !g.is_trivial())
    }

    /// (n_alpha, n_beta) implied by the electron count and spin.
    pub fn alpha_beta(&self) -> (usize, usize) {
        let n = self.electron_count as i32;
        let na = (n + self.spin) / 2 + (n + self.spin) % 2;
        let nb = n - na;
        (na.max(0) as usize, nb.max(0) as usize)
    }
}
