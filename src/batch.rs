//
// batch.rs
// Dicom-Volume-Tools-rs
//
// Batch conversion: every directory below a root that holds DICOM files becomes one volume.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{error, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::RunConfig;
use crate::convert::{self, VolumeOptions};
use crate::error::{Result, ToolError};
use crate::models::BatchReport;
use crate::progress;

pub(crate) fn is_dicom_file(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("dcm"))
}

/// Entries of `walker`; unreadable ones are logged and skipped.
pub(crate) fn readable_entries(walker: WalkDir) -> impl Iterator<Item = DirEntry> {
    walker.into_iter().filter_map(|entry| match entry {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Skipping {:?}: {}", e.path().unwrap_or_else(|| Path::new("?")), e);
            None
        }
    })
}

/// Directories below `root` (itself included) that directly contain `.dcm` files, sorted.
pub fn find_series_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{:?} is not a directory", root),
        )));
    }
    let dirs: BTreeSet<PathBuf> = readable_entries(WalkDir::new(root))
        .filter(|e| e.file_type().is_file() && is_dicom_file(e.path()))
        .filter_map(|e| e.path().parent().map(Path::to_path_buf))
        .collect();
    Ok(dirs.into_iter().collect())
}

/// Output stem for a series directory: its path relative to `root`, joined with `_`.
pub fn series_stem(root: &Path, dir: &Path) -> String {
    let parts: Vec<String> = dir
        .strip_prefix(root)
        .unwrap_or(dir)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        convert::input_stem(root)
    } else {
        parts.join("_")
    }
}

/// Convert every series below `root` into `config.out_dir`. Per-series
/// failures are logged and collected; the caller decides how to exit.
pub fn convert_all(root: &Path, config: &RunConfig, options: &VolumeOptions) -> Result<BatchReport> {
    let dirs = find_series_dirs(root)?;
    info!("Found {} series directories below {:?}", dirs.len(), root);
    std::fs::create_dir_all(&config.out_dir)?;

    let series_options = VolumeOptions {
        recursive: false,
        ..*options
    };
    let pb = progress::bar(dirs.len() as u64, config.show_progress, "Converting");

    enum Outcome {
        Converted(PathBuf),
        Skipped(PathBuf),
        Failed(PathBuf, String),
    }

    let stems: Vec<String> = dirs.iter().map(|dir| series_stem(root, dir)).collect();
    let mut stem_counts: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *stem_counts.entry(stem.as_str()).or_insert(0) += 1;
    }

    let outcomes: Vec<Outcome> = dirs
        .par_iter()
        .zip(&stems)
        .map(|(dir, stem)| {
            let name = convert::volume_file_name(stem, options.compress);
            let output = config.output_path(name);
            let outcome = if stem_counts[stem.as_str()] > 1 {
                let message = format!("output name {:?} is shared with another series directory", output);
                error!("Failed to convert {:?}: {}", dir, message);
                Outcome::Failed(dir.clone(), message)
            } else if output.exists() && !config.force {
                warn!("Skipping {:?}: {:?} already exists", dir, output);
                Outcome::Skipped(output)
            } else {
                match convert::dicom_to_volume(dir, &output, &series_options, config.force) {
                    Ok(_) => Outcome::Converted(output),
                    Err(e) => {
                        error!("Failed to convert {:?}: {}", dir, e);
                        Outcome::Failed(dir.clone(), e.to_string())
                    }
                }
            };
            pb.inc(1);
            outcome
        })
        .collect();
    pb.finish_and_clear();

    let mut report = BatchReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Converted(p) => report.converted.push(p),
            Outcome::Skipped(p) => report.skipped.push(p),
            Outcome::Failed(p, e) => report.failed.push((p, e)),
        }
    }
    info!(
        "Batch finished: {} converted, {} skipped, {} failed",
        report.converted.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}
