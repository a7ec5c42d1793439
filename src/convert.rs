//
// convert.rs
// Dicom-Volume-Tools-rs
//
// Conversion flows: DICOM series to volume, volume to DICOM series, and header-only extraction.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use dicom::object::open_file;
use dicom_dictionary_std::tags;
use regex::Regex;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::attributes::{AttributeKey, AttributeSet};
use crate::batch::readable_entries;
use crate::codec;
use crate::error::{Result, ToolError};
use crate::geometry::Geometry;
use crate::header_store::HeaderStore;
use crate::models::BatchReport;
use crate::orientation::{self, AxisCodes};
use crate::resolver::AttributeResolver;
use crate::series::{Series, SeriesLoader};
use crate::volume::Volume;
use crate::writer;

/// Switches of the DICOM to volume conversion.
#[derive(Debug, Clone, Copy)]
pub struct VolumeOptions {
    pub compress: bool,
    pub reorient: Option<AxisCodes>,
    pub recursive: bool,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        VolumeOptions {
            compress: true,
            reorient: None,
            recursive: false,
        }
    }
}

/// `name.nii.gz` or `name.nii`.
pub fn volume_file_name(stem: &str, compress: bool) -> String {
    if compress {
        format!("{stem}.nii.gz")
    } else {
        format!("{stem}.nii")
    }
}

/// Replace any `.nii` / `.nii.gz` suffix with the one matching `compress`.
pub fn with_volume_extension(path: &Path, compress: bool) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name);
    path.with_file_name(volume_file_name(stem, compress))
}

/// Name used for outputs derived from an input directory or file.
pub fn input_stem(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "series".to_string());
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .map(str::to_string)
        .unwrap_or(name)
}

fn series_geometry(series: &Series, options: &VolumeOptions) -> Result<Geometry> {
    match Geometry::from_series(series) {
        Ok(geometry) => Ok(geometry),
        Err(e) if options.reorient.is_none() => {
            warn!("{}; continuing with an axis-aligned geometry", e);
            Geometry::fallback(series)
        }
        Err(e) => Err(e),
    }
}

/// Load a series directory into a volume, reoriented when requested.
pub fn load_volume(input: &Path, options: &VolumeOptions) -> Result<Volume> {
    let series = SeriesLoader::new(input)
        .recursive(options.recursive)
        .load()?;
    let geometry = series_geometry(&series, options)?;
    let volume = Volume::from_series(&series, geometry);
    match options.reorient {
        Some(target) => Ok(orientation::reorient(volume, target)?.0),
        None => Ok(volume),
    }
}

/// DICOM series directory to a NIfTI-1 file. Returns the written volume.
pub fn dicom_to_volume(
    input: &Path,
    output: &Path,
    options: &VolumeOptions,
    force: bool,
) -> Result<Volume> {
    crate::config::ensure_writable(output, force)?;
    let volume = load_volume(input, options)?;
    codec::write_volume(&volume, output, options.compress, force)?;
    Ok(volume)
}

/// Attributes of a reference DICOM file, used as defaults when writing a series.
/// Instance and series identity are left out so the new series gets its own.
pub fn reference_defaults(path: &Path) -> Result<HeaderStore> {
    let obj = open_file(path)?;
    let mut store = HeaderStore::from_dicom(obj.meta(), &obj);
    for tag in [
        tags::SOP_INSTANCE_UID,
        tags::SERIES_INSTANCE_UID,
        tags::MEDIA_STORAGE_SOP_INSTANCE_UID,
    ] {
        store.data.remove(AttributeKey::new(tag));
        store.file_meta.remove(AttributeKey::new(tag));
    }
    Ok(store)
}

/// NIfTI-1 file to a DICOM series directory.
pub fn volume_to_dicom(
    input: &Path,
    out_dir: &Path,
    resolver: &AttributeResolver,
    defaults: Option<&HeaderStore>,
    force: bool,
) -> Result<Vec<PathBuf>> {
    crate::config::ensure_writable(out_dir, force)?;
    let volume = codec::read_volume(input)?;

    let mut data_defaults = volume.attributes.clone();
    let mut meta_defaults = AttributeSet::new();
    if let Some(store) = defaults {
        data_defaults.merge_from(&store.data);
        meta_defaults.merge_from(&store.file_meta);
    }
    let attributes = resolver.resolve(&data_defaults);
    let file_meta = resolver.resolve_file_meta(&meta_defaults);

    let (nx, ny, nz) = volume.dims();
    info!("Writing {}x{}x{} volume {:?} as DICOM", nx, ny, nz, input);
    writer::write_series(&volume, &attributes, &file_meta, out_dir, force)
}

/// Selects the volume files of a directory by file name.
#[derive(Debug, Clone)]
pub enum VolumeFilter {
    Glob(glob::Pattern),
    Regex(Regex),
}

impl VolumeFilter {
    pub const DEFAULT_PATTERN: &'static str = "*.nii.gz";

    pub fn glob(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(VolumeFilter::Glob)
            .map_err(|e| ToolError::InvalidPattern(format!("{pattern:?}: {e}")))
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(VolumeFilter::Regex)
            .map_err(|e| ToolError::InvalidPattern(format!("{pattern:?}: {e}")))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            VolumeFilter::Glob(pattern) => pattern.matches(name),
            VolumeFilter::Regex(re) => re.is_match(name),
        }
    }
}

/// Files directly inside `dir` whose names pass `filter`, in name order.
pub fn find_volume_files(dir: &Path, filter: &VolumeFilter) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{:?} is not a directory", dir),
        )));
    }
    let walker = WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name();
    Ok(readable_entries(walker)
        .filter(|e| e.file_type().is_file())
        .filter(|e| filter.matches(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect())
}

/// Convert every matching volume in `in_dir` into `<out_root>/<volume name>/`.
/// Existing series are skipped unless `force`; failures are collected.
pub fn volumes_to_dicom(
    in_dir: &Path,
    out_root: &Path,
    filter: &VolumeFilter,
    resolver: &AttributeResolver,
    defaults: Option<&HeaderStore>,
    force: bool,
) -> Result<BatchReport> {
    let files = find_volume_files(in_dir, filter)?;
    info!("Found {} volume file(s) in {:?}", files.len(), in_dir);

    let mut report = BatchReport::default();
    for file in files {
        let out_dir = out_root.join(input_stem(&file));
        match volume_to_dicom(&file, &out_dir, resolver, defaults, force) {
            Ok(_) => report.converted.push(out_dir),
            Err(ToolError::OutputExists(existing)) => {
                warn!("Skipping {:?}: {:?} already exists", file, existing);
                report.skipped.push(existing);
            }
            Err(e) => {
                error!("Failed to convert {:?}: {}", file, e);
                report.failed.push((file, e.to_string()));
            }
        }
    }
    Ok(report)
}

/// Header-only mode: write the effective attributes of a series to a header store.
pub fn extract_headers(
    input: &Path,
    output: &Path,
    resolver: &AttributeResolver,
    recursive: bool,
    force: bool,
) -> Result<HeaderStore> {
    crate::config::ensure_writable(output, force)?;
    let series = SeriesLoader::new(input).recursive(recursive).load()?;
    let data = resolver.resolve(series.header());
    let file_meta = resolver.resolve_file_meta(series.file_meta());

    let mut store = HeaderStore::new(file_meta, data);
    store.info = Some(format!(
        "Header of {} slice(s) read from {}",
        series.len(),
        input.display()
    ));
    store.write(output, force)?;
    info!("Header store written to {:?}", output);
    Ok(store)
}
