//! Logging setup and result reporting.

use color_eyre::eyre::Result;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::SystemTime as StdSystemTime;
use tracing::info;
use tracing_subscriber::{
    fmt::format::Writer, fmt::layer, fmt::time::FormatTime, layer::SubscriberExt,
    util::SubscriberInitExt, Registry,
};

use crate::solver::SolverHandle;

/// Custom time formatter that shows only seconds
struct SecondPrecisionTimer;

impl FormatTime for SecondPrecisionTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = StdSystemTime::now();
        let duration = now
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        let total_seconds = duration.as_secs();
        let hours = (total_seconds / 3600) % 24;
        let minutes = (total_seconds / 60) % 60;
        let seconds = total_seconds % 60;

        write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Setup output logging to file or stdout
pub fn setup_output(output_path: Option<&String>) {
    match output_path {
        Some(path) => {
            info!("Output will be written to: {}", path);
            if let Ok(log) = File::create(path) {
                let file_layer = layer()
                    .with_writer(log)
                    .with_timer(SecondPrecisionTimer)
                    .with_ansi(false);
                Registry::default().with(file_layer).init();
            } else {
                eprintln!("Could not create output file: {}", path);
            }
        }
        None => {
            let stdout_layer = layer()
                .with_writer(std::io::stdout)
                .with_timer(SecondPrecisionTimer)
                .with_ansi(true);
            Registry::default().with(stdout_layer).init();
        }
    }
}

/// Log the terminal state of a solve: orbital energies, occupations and
/// the total energy.
pub fn report_results(mf: &SolverHandle) {
    let results = &mf.results;
    info!("\nMethod: {} [{}]", mf.variant().label(), mf.kernel_name());
    info!("Converged: {}", results.converged);
    info!("\nOrbital energies:");
    for (i, (energy, occ)) in results
        .mo_energy
        .iter()
        .zip(results.mo_occ.iter())
        .enumerate()
    {
        info!(
            "  Level {:2}: {:12.8} au  (occ {:.1})",
            i + 1,
            energy,
            occ
        );
    }
    info!("\nTotal energy: {:.10} au", results.e_tot);
}

/// Write the terminal state to a file or other writer.
pub fn write_results<W: Write>(writer: &mut W, mf: &SolverHandle) -> Result<()> {
    writeln!(writer, "Method: {}", mf.variant().label())?;
    writeln!(writer, "Converged: {}", mf.results.converged)?;
    for (i, energy) in mf.results.mo_energy.iter().enumerate() {
        writeln!(writer, "  Level {}: {:.8} au", i + 1, energy)?;
    }
    writeln!(writer, "Total energy: {:.10} au", mf.results.e_tot)?;
    Ok(())
}
