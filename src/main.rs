//! Solver driver command-line interface.
//!
//! Reads a YAML description of a molecular system, selects the mean-field
//! method, and runs either a plain solve or the warm-started Newton
//! pipeline.

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use periodic_table_on_an_enum::Element;
use std::fs;
use tracing::info;

use scf_driver::config::{Args, Config};
use scf_driver::io::{report_results, setup_output, write_results};
use scf_driver::{
    dhf, fast_newton, rhf, rks, rohf, uhf, uks, FastNewtonOptions, MolecularSystem, PointGroup,
    SolverHandle,
};

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_output(args.output.as_ref());

    info!("Reading configuration from: {}", args.config_file);
    let config_content = fs::read_to_string(&args.config_file)
        .wrap_err_with(|| format!("Unable to read configuration file: {}", args.config_file))?;

    let config: Config = serde_yml::from_str::<Config>(&config_content)
        .wrap_err("Failed to parse configuration file")?
        .with_defaults();

    let system = build_system(&config, &args)?;
    info!(
        "System: {} electrons, spin {}, symmetry {}",
        system.electron_count(),
        system.spin(),
        system
            .point_group()
            .map_or("none".to_string(), |g| g.label().to_string())
    );

    let method = args
        .method
        .clone()
        .or_else(|| config.method.clone())
        .unwrap_or_else(|| {
            if system.spin() > 0 {
                "uhf".to_string()
            } else {
                "rhf".to_string()
            }
        });
    let mut mf = build_solver(&method, &system)?;
    info!("Selected method: {}", mf.variant().label());

    mf.params = config.scf_params.to_params();
    if let Some(max_cycle) = args.max_cycle {
        info!("Overriding max_cycle with: {}", max_cycle);
        mf.params.max_cycle = max_cycle;
    }
    if let Some(shift) = args.level_shift {
        info!("Overriding level_shift with: {}", shift);
        mf.params.level_shift = shift;
    }

    if args.fast || config.fast_newton.is_some() {
        let opts = config
            .fast_newton
            .as_ref()
            .map(|section| section.to_options())
            .unwrap_or_default();
        info!("Running warm-started Newton pipeline");
        let report = fast_newton(&mut mf, opts);
        if let Some(warm) = &report.warm_start {
            info!(
                "Warm start: converged={} E={:.10} au (level shift {})",
                warm.converged, warm.e_tot, warm.level_shift
            );
        }
    } else {
        info!("Running plain SCF solve");
        mf.solve(None);
    }

    report_results(&mf);
    if let Some(path) = &args.output {
        let mut file = fs::File::create(format!("{}.results", path))?;
        write_results(&mut file, &mf)?;
    }

    Ok(())
}

/// Build the molecular system from the configured geometry, charge and
/// spin, with command-line overrides.
fn build_system(config: &Config, args: &Args) -> Result<MolecularSystem> {
    let mut elements = Vec::new();
    for atom in &config.geometry {
        let element = Element::from_symbol(&atom.element)
            .ok_or_else(|| eyre!("Invalid element symbol: {}", atom.element))?;
        elements.push(element);
    }

    let charge = args.charge.or(config.charge).unwrap_or(0);
    let spin = args.spin.or(config.spin).unwrap_or(0);
    let mut system = MolecularSystem::from_elements(&elements, charge, spin);

    if let Some(label) = &config.symmetry {
        let group = PointGroup::from_label(label)
            .ok_or_else(|| eyre!("Unknown point group: {}", label))?;
        system = system.with_symmetry(group);
    }
    Ok(system)
}

fn build_solver(method: &str, system: &MolecularSystem) -> Result<SolverHandle> {
    match method.to_lowercase().as_str() {
        "rhf" => Ok(rhf(system)),
        "rohf" => Ok(rohf(system)),
        "uhf" => Ok(uhf(system)),
        "dhf" => Ok(dhf(system)),
        "rks" => Ok(rks(system)),
        "uks" => Ok(uks(system)),
        other => Err(eyre!("Unknown method family: {}", other)),
    }
}
