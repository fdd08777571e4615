//! Configuration management for the solver driver.
//!
//! YAML configuration files describe the molecular system and the solve to
//! run; command-line arguments override individual fields.

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::decorate::AuxBasisSpec;
use crate::pipeline::FastNewtonOptions;
use crate::solver::ScfParams;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "scf_driver")]
#[command(
    about = "Mean-field method dispatch and two-stage SCF convergence driver",
    long_about = None
)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "example/h2o.yaml")]
    pub config_file: String,

    /// Output file path (optional)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Molecular charge (overrides config file)
    #[arg(long)]
    pub charge: Option<i32>,

    /// Spin, n_alpha - n_beta (overrides config file)
    #[arg(long)]
    pub spin: Option<i32>,

    /// Method family: rhf, rohf, uhf, dhf, rks, uks (overrides config file)
    #[arg(long)]
    pub method: Option<String>,

    /// Run the warm-started Newton pipeline instead of a plain solve
    #[arg(long)]
    pub fast: bool,

    /// Maximum number of SCF cycles (overrides config file)
    #[arg(long)]
    pub max_cycle: Option<usize>,

    /// Level shift in AU applied to virtual orbitals (overrides config file)
    #[arg(long)]
    pub level_shift: Option<f64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Molecular geometry
    pub geometry: Vec<AtomConfig>,

    /// Molecular charge (optional)
    #[serde(default)]
    pub charge: Option<i32>,

    /// Spin, n_alpha - n_beta (optional)
    #[serde(default)]
    pub spin: Option<i32>,

    /// Point-group label, e.g. "C2v"; omit for no symmetry
    #[serde(default)]
    pub symmetry: Option<String>,

    /// Method family: rhf, rohf, uhf, dhf, rks, uks
    #[serde(default)]
    pub method: Option<String>,

    /// SCF parameters
    #[serde(default)]
    pub scf_params: ScfConfig,

    /// Warm-started Newton pipeline; presence enables it
    #[serde(default)]
    pub fast_newton: Option<FastNewtonConfig>,
}

impl Config {
    /// Apply default values to any missing fields.
    pub fn with_defaults(mut self) -> Self {
        self.scf_params = self.scf_params.with_defaults();
        self
    }
}

/// Atom in the molecular geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomConfig {
    /// Element symbol (e.g. "H", "O", "C")
    pub element: String,

    /// Atomic coordinates [x, y, z] in Angstroms
    pub coords: [f64; 3],
}

/// SCF parameters, all optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScfConfig {
    /// Energy convergence threshold in Hartree
    #[serde(default)]
    pub conv_tol: Option<f64>,

    /// Orbital-gradient convergence threshold
    #[serde(default)]
    pub conv_tol_grad: Option<f64>,

    /// Maximum number of SCF cycles
    #[serde(default)]
    pub max_cycle: Option<usize>,

    /// Level shift in AU applied to virtual orbitals
    #[serde(default)]
    pub level_shift: Option<f64>,

    /// Weight of the new density in the damped fixed-point update
    #[serde(default)]
    pub density_mixing: Option<f64>,
}

impl ScfConfig {
    /// Apply default values to any missing fields.
    pub fn with_defaults(mut self) -> Self {
        let defaults = ScfParams::default();
        self.conv_tol.get_or_insert(defaults.conv_tol);
        self.conv_tol_grad.get_or_insert(defaults.conv_tol_grad);
        self.max_cycle.get_or_insert(defaults.max_cycle);
        self.level_shift.get_or_insert(defaults.level_shift);
        self.density_mixing.get_or_insert(defaults.density_mixing);
        self
    }

    pub fn to_params(&self) -> ScfParams {
        let defaults = ScfParams::default();
        ScfParams {
            conv_tol: self.conv_tol.unwrap_or(defaults.conv_tol),
            conv_tol_grad: self.conv_tol_grad.unwrap_or(defaults.conv_tol_grad),
            max_cycle: self.max_cycle.unwrap_or(defaults.max_cycle),
            level_shift: self.level_shift.unwrap_or(defaults.level_shift),
            density_mixing: self.density_mixing.unwrap_or(defaults.density_mixing),
        }
    }
}

/// Warm-started Newton pipeline section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FastNewtonConfig {
    /// Named auxiliary fitting basis; omit for the even-tempered default
    #[serde(default)]
    pub auxbasis: Option<String>,

    #[serde(default)]
    pub warm_conv_tol: Option<f64>,

    #[serde(default)]
    pub warm_conv_tol_grad: Option<f64>,

    #[serde(default)]
    pub warm_level_shift: Option<f64>,

    #[serde(default)]
    pub small_rho_cutoff: Option<f64>,
}

impl FastNewtonConfig {
    pub fn to_options(&self) -> FastNewtonOptions {
        let defaults = FastNewtonOptions::default();
        FastNewtonOptions {
            auxbasis: self.auxbasis.as_deref().map(AuxBasisSpec::named),
            initial_density: None,
            initial_orbitals: None,
            warm_conv_tol: self.warm_conv_tol.unwrap_or(defaults.warm_conv_tol),
            warm_conv_tol_grad: self
                .warm_conv_tol_grad
                .unwrap_or(defaults.warm_conv_tol_grad),
            warm_level_shift: self.warm_level_shift.unwrap_or(defaults.warm_level_shift),
            small_rho_cutoff: self.small_rho_cutoff.unwrap_or(defaults.small_rho_cutoff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let yaml = r#"
geometry:
  - element: H
    coords: [0.0, 0.0, 0.0]
  - element: H
    coords: [0.0, 0.0, 0.74]
"#;
        let config: Config = serde_yml::from_str::<Config>(yaml).unwrap().with_defaults();
        assert_eq!(config.geometry.len(), 2);
        assert!(config.symmetry.is_none());
        assert!(config.fast_newton.is_none());
        let params = config.scf_params.to_params();
        assert_eq!(params, ScfParams::default());
    }

    #[test]
    fn fast_newton_section_overrides_defaults() {
        let yaml = r#"
geometry:
  - element: He
    coords: [0.0, 0.0, 0.0]
method: rhf
fast_newton:
  auxbasis: weigend+etb
  warm_conv_tol: 0.1
"#;
        let config: Config = serde_yml::from_str(yaml).unwrap();
        let opts = config.fast_newton.unwrap().to_options();
        assert_eq!(opts.auxbasis, Some(AuxBasisSpec::named("weigend+etb")));
        assert_eq!(opts.warm_conv_tol, 0.1);
        assert_eq!(opts.warm_level_shift, 0.3);
    }
}
