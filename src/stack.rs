//
// stack.rs
// Dicom-Volume-Tools-rs
//
// Converts a directory of 2D images, multi-page TIFFs included, into a grayscale DICOM series.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use image::{ColorType, DynamicImage};
use ndarray::{Array2, Array3, Axis};
use regex::Regex;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::attributes::AttributeSet;
use crate::batch::readable_entries;
use crate::error::{Result, ToolError};
use crate::geometry::Geometry;
use crate::progress;
use crate::volume::{SampleType, Volume};
use crate::writer;

pub const DEFAULT_EXTENSIONS: &[&str] = &["png", "tif", "tiff", "jpg", "jpeg", "bmp"];

/// Which files of a directory form the stack.
#[derive(Debug, Clone, Default)]
pub struct StackOptions {
    /// Matched against the file name; replaces the extension filter when set.
    pub regex: Option<Regex>,
    /// Keep at most this many images (after sorting).
    pub max_files: Option<usize>,
    pub show_progress: bool,
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| {
            DEFAULT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Image files of `dir` in name order.
pub fn find_images(dir: &Path, options: &StackOptions) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{:?} is not a directory", dir),
        )));
    }
    let walker = WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name();
    let mut paths: Vec<PathBuf> = readable_entries(walker)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| match &options.regex {
            Some(re) => p
                .file_name()
                .map_or(false, |n| re.is_match(&n.to_string_lossy())),
            None => has_image_extension(p),
        })
        .collect();
    if let Some(max) = options.max_files {
        paths.truncate(max);
    }
    Ok(paths)
}

fn is_wide(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16
    )
}

/// Grayscale plane `[row, col]` and its sample type.
fn read_plane(path: &Path) -> Result<(Array2<i64>, SampleType)> {
    let img: DynamicImage =
        image::open(path).map_err(|e| ToolError::foreign(path, format!("cannot read image: {e}")))?;
    let (width, height) = (img.width() as usize, img.height() as usize);

    let (values, sample_type): (Vec<i64>, SampleType) = if is_wide(img.color()) {
        let luma = img.into_luma16();
        (luma.into_raw().into_iter().map(i64::from).collect(), SampleType::U16)
    } else {
        let luma = img.into_luma8();
        (luma.into_raw().into_iter().map(i64::from).collect(), SampleType::U8)
    };
    let plane = Array2::from_shape_vec((height, width), values)
        .map_err(|e| ToolError::foreign(path, e.to_string()))?;
    Ok((plane, sample_type))
}

/// Identity geometry with spacing taken from PixelSpacing and SliceThickness when present.
fn stack_geometry(attributes: &AttributeSet) -> Result<Geometry> {
    let mut spacing = [1.0, 1.0, 1.0];
    if let Some(values) = attributes.floats(tags::PIXEL_SPACING) {
        // PixelSpacing is row spacing first.
        if let [row, col, ..] = values[..] {
            spacing[0] = col;
            spacing[1] = row;
        } else if let [both] = values[..] {
            spacing[0] = both;
            spacing[1] = both;
        }
    }
    let through = attributes
        .floats(tags::SPACING_BETWEEN_SLICES)
        .or_else(|| attributes.floats(tags::SLICE_THICKNESS));
    if let Some(&thickness) = through.as_ref().and_then(|v| v.first()) {
        spacing[2] = thickness;
    }
    Geometry::axis_aligned(spacing, [0.0; 3])
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
}

/// One grayscale page of a TIFF; only 8- and 16-bit single-channel pages are accepted.
fn tiff_page(decoder: &mut Decoder<BufReader<File>>, path: &Path, page: usize) -> Result<(Array2<i64>, SampleType)> {
    let unreadable = |e: tiff::TiffError| ToolError::foreign(path, format!("TIFF page {page}: {e}"));
    let color = decoder.colortype().map_err(unreadable)?;
    if !matches!(color, tiff::ColorType::Gray(8) | tiff::ColorType::Gray(16)) {
        return Err(ToolError::foreign(
            path,
            format!("TIFF page {page} is {color:?}; multi-page stacks must be 8- or 16-bit grayscale"),
        ));
    }
    let (width, height) = decoder.dimensions().map_err(unreadable)?;
    let (values, sample_type): (Vec<i64>, SampleType) = match decoder.read_image().map_err(unreadable)? {
        DecodingResult::U8(v) => (v.into_iter().map(i64::from).collect(), SampleType::U8),
        DecodingResult::U16(v) => (v.into_iter().map(i64::from).collect(), SampleType::U16),
        _ => return Err(ToolError::foreign(path, format!("TIFF page {page} has an unsupported sample format"))),
    };
    let plane = Array2::from_shape_vec((height as usize, width as usize), values)
        .map_err(|e| ToolError::foreign(path, format!("TIFF page {page}: {e}")))?;
    Ok((plane, sample_type))
}

/// Every page of a multi-page TIFF, or `None` for a single page.
fn read_tiff_pages(path: &Path) -> Result<Option<Vec<(Array2<i64>, SampleType)>>> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| ToolError::foreign(path, format!("cannot read TIFF: {e}")))?;
    if !decoder.more_images() {
        return Ok(None);
    }
    let mut pages = vec![tiff_page(&mut decoder, path, 0)?];
    while decoder.more_images() {
        decoder
            .next_image()
            .map_err(|e| ToolError::foreign(path, format!("TIFF page {}: {e}", pages.len())))?;
        pages.push(tiff_page(&mut decoder, path, pages.len())?);
    }
    debug!("{:?}: {} TIFF pages", path, pages.len());
    Ok(Some(pages))
}

/// Planes of one image file: every page of a multi-page TIFF, else the single image.
fn read_planes(path: &Path) -> Result<Vec<(Array2<i64>, SampleType)>> {
    if is_tiff(path) {
        if let Some(pages) = read_tiff_pages(path)? {
            return Ok(pages);
        }
    }
    Ok(vec![read_plane(path)?])
}

/// Read the images into a volume; all planes must share their dimensions.
pub fn load_stack(paths: &[PathBuf], attributes: &AttributeSet, show_progress: bool) -> Result<Volume> {
    let Some(first) = paths.first() else {
        return Err(ToolError::EmptySeries(PathBuf::new()));
    };
    let pb = progress::bar(paths.len() as u64, show_progress, "Reading images");

    let mut planes: Vec<(&Path, Array2<i64>)> = Vec::with_capacity(paths.len());
    let mut sample_type = SampleType::U8;
    for path in paths {
        for (plane, ty) in read_planes(path)? {
            if ty == SampleType::U16 {
                sample_type = SampleType::U16;
            }
            debug!("{:?}: {:?}", path, plane.dim());
            planes.push((path, plane));
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let (rows, cols) = planes[0].1.dim();
    for (path, plane) in &planes {
        if plane.dim() != (rows, cols) {
            return Err(ToolError::foreign(
                *path,
                format!(
                    "image is {}x{}, expected {}x{} as in {:?}",
                    plane.dim().1,
                    plane.dim().0,
                    cols,
                    rows,
                    first
                ),
            ));
        }
    }

    let mut data = Array3::<i64>::zeros((cols, rows, planes.len()));
    for (k, (_, plane)) in planes.iter().enumerate() {
        data.index_axis_mut(Axis(2), k).assign(&plane.t());
    }
    let mut volume = Volume::new(data, sample_type, stack_geometry(attributes)?);
    volume.attributes = attributes.clone();
    Ok(volume)
}

/// Image directory to DICOM series directory.
pub fn stack_to_dicom(
    input: &Path,
    out_dir: &Path,
    attributes: &AttributeSet,
    file_meta: &AttributeSet,
    options: &StackOptions,
    force: bool,
) -> Result<Vec<PathBuf>> {
    crate::config::ensure_writable(out_dir, force)?;
    let paths = find_images(input, options)?;
    if paths.is_empty() {
        return Err(ToolError::EmptySeries(input.to_path_buf()));
    }
    info!("Converting {} image(s) from {:?}", paths.len(), input);
    let volume = load_stack(&paths, attributes, options.show_progress)?;
    writer::write_series(&volume, attributes, file_meta, out_dir, force)
}
