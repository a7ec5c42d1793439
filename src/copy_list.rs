//
// copy_list.rs
// Dicom-Volume-Tools-rs
//
// Copies the files or folders named in a CSV list from a source tree into an output directory.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::Path;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, ToolError};
use crate::models::CopyListReport;
use crate::progress;

#[derive(Debug, Clone, Default)]
pub struct CopyListOptions {
    /// Named column of a list with a header row; the first column of a headerless list otherwise.
    pub column: Option<String>,
    /// Drop the relative directories of the entries.
    pub flat: bool,
    pub skip_missing: bool,
    pub show_progress: bool,
}

/// Entries of the list file. Lines starting with `#` are comments; blank entries are ignored.
pub fn read_list(list_file: &Path, column: Option<&str>) -> Result<Vec<String>> {
    if !list_file.is_file() {
        return Err(ToolError::ListFile(format!(
            "list file does not exist: {:?}",
            list_file
        )));
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(column.is_some())
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(list_file)?;

    let index = match column {
        Some(name) => reader
            .headers()?
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ToolError::ListFile(format!("list file misses a column named {name:?}")))?,
        None => 0,
    };

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(entry) = record.get(index).filter(|e| !e.is_empty()) {
            entries.push(entry.to_string());
        }
    }
    Ok(entries)
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy `entries` (paths relative to `in_dir`) into `out_dir`. Existing targets are kept.
pub fn copy_entries(
    in_dir: &Path,
    out_dir: &Path,
    entries: &[String],
    options: &CopyListOptions,
) -> Result<CopyListReport> {
    if !in_dir.is_dir() {
        return Err(ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{:?} is not a directory", in_dir),
        )));
    }
    fs::create_dir_all(out_dir)?;

    let pb = progress::bar(entries.len() as u64, options.show_progress, "Copying");
    let mut report = CopyListReport {
        requested: entries.len(),
        ..Default::default()
    };
    for entry in entries {
        pb.inc(1);
        let src = in_dir.join(entry);
        let dst = if options.flat {
            match Path::new(entry).file_name() {
                Some(name) => out_dir.join(name),
                None => out_dir.join(entry),
            }
        } else {
            out_dir.join(entry)
        };

        if dst.exists() {
            info!("Skipping existing content: {}", entry);
            report.skipped.push(dst);
            continue;
        }
        if !src.exists() {
            if options.skip_missing {
                warn!("Could not copy content {:?}: not found", src);
                report.missing.push(src);
                continue;
            }
            pb.finish_and_clear();
            return Err(ToolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("could not copy content {:?}: not found", src),
            )));
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        if src.is_dir() {
            copy_dir(&src, &dst)?;
        } else {
            fs::copy(&src, &dst)?;
        }
        report.copied.push(dst);
    }
    pb.finish_and_clear();

    info!(
        "Copied {} out of {} entries",
        report.copied.len() + report.skipped.len(),
        report.requested
    );
    Ok(report)
}

/// Read `list_file` and copy its entries.
pub fn copy_from_list(
    in_dir: &Path,
    out_dir: &Path,
    list_file: &Path,
    options: &CopyListOptions,
) -> Result<CopyListReport> {
    let entries = read_list(list_file, options.column.as_deref())?;
    info!("{} entries listed in {:?}", entries.len(), list_file);
    copy_entries(in_dir, out_dir, &entries, options)
}
