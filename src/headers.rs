//
// headers.rs
// Dicom-Volume-Tools-rs
//
// Copies DICOM files without their pixel data, keeping the directory layout of the source tree.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use dicom::object::open_file;
use dicom_dictionary_std::tags;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::batch::{is_dicom_file, readable_entries};
use crate::error::{Result, ToolError};
use crate::models::HeaderCopyReport;
use crate::progress;

pub const NO_PIXEL_DATA_LIST: &str = "_no_pixel_data.csv";

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderCopyOptions {
    /// Copy every file instead of the first one per folder.
    pub all_files: bool,
    /// Also copy files that carry no pixel data.
    pub keep_empty: bool,
    pub force: bool,
    pub show_progress: bool,
}

/// `*.dcm` files below `dir`, sorted by path.
pub fn find_dicom_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{:?} is not a directory", dir),
        )));
    }
    let mut files: Vec<PathBuf> = readable_entries(WalkDir::new(dir))
        .filter(|e| e.file_type().is_file() && is_dicom_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// One path per CSV record, without a header row.
fn write_path_list(list: &Path, paths: &[PathBuf]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(list)?;
    for path in paths {
        writer.write_record([path.to_string_lossy().as_ref()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write header-only copies of the DICOM files below `in_dir` into `out_dir`.
pub fn copy_headers(in_dir: &Path, out_dir: &Path, options: &HeaderCopyOptions) -> Result<HeaderCopyReport> {
    let files = find_dicom_files(in_dir)?;
    info!("Found {} DICOM file(s) below {:?}", files.len(), in_dir);
    fs::create_dir_all(out_dir)?;

    let pb = progress::bar(files.len() as u64, options.show_progress, "Copying headers");
    let mut report = HeaderCopyReport::default();
    let mut folders = std::collections::BTreeSet::new();
    let mut last_written_parent: Option<PathBuf> = None;

    for path in &files {
        pb.inc(1);
        let relative = path.strip_prefix(in_dir).unwrap_or(path);
        let target = out_dir.join(relative);
        let parent = target.parent().unwrap_or(out_dir).to_path_buf();
        folders.insert(parent.clone());
        if !options.all_files && last_written_parent.as_ref() == Some(&parent) {
            continue;
        }

        let mut obj = match open_file(path) {
            Ok(obj) => obj,
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };
        if obj.element(tags::PIXEL_DATA).is_err() {
            warn!("PixelData is empty: {:?}", path);
            report.no_pixel_data.push(path.clone());
            if !options.keep_empty {
                continue;
            }
        }
        obj.remove_element(tags::PIXEL_DATA);

        if target.exists() && !options.force {
            warn!("Skipping existing header {:?}", target);
            last_written_parent = Some(parent);
            continue;
        }
        fs::create_dir_all(&parent)?;
        obj.write_to_file(&target)?;
        debug!("Header written to {:?}", target);
        report.written.push(target);
        last_written_parent = Some(parent);
    }
    pb.finish_and_clear();
    report.folders = folders.len();

    if !report.no_pixel_data.is_empty() {
        let list = out_dir.join(NO_PIXEL_DATA_LIST);
        write_path_list(&list, &report.no_pixel_data)?;
        info!("{} file(s) without pixel data listed in {:?}", report.no_pixel_data.len(), list);
    }

    info!(
        "Created {} DICOM header(s) in {} folder(s)",
        report.written.len(),
        report.folders
    );
    Ok(report)
}
