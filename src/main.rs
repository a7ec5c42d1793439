//
// main.rs
// Dicom-Volume-Tools-rs
//
// Binary entry point that hands off execution to the CLI layer.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom_volume_tools::cli;

fn main() -> anyhow::Result<()> {
    cli::run()
}
