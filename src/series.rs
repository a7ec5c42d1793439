//
// series.rs
// Dicom-Volume-Tools-rs
//
// Discovers, validates and orders the slice files of one DICOM series.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use dicom::object::open_file;
use dicom::pixeldata::PixelDecoder;
use dicom_dictionary_std::tags;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, VoiLutOption};
use ndarray::{s, Array2};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::attributes::AttributeSet;
use crate::dicom_access::ElementAccess;
use crate::error::{Result, ToolError};
use crate::geometry::{cross, dot, norm, Vec3, GEOMETRY_TOLERANCE};
use crate::header_store::file_meta_attributes;
use crate::volume::{Rescale, SampleType};

/// One decoded image plane and the header fields that place it in space.
#[derive(Debug, Clone)]
pub struct Slice {
    pub path: PathBuf,
    /// Stored values, `[row, column]`.
    pub plane: Array2<i64>,
    pub sample_type: SampleType,
    pub attributes: AttributeSet,
    pub file_meta: AttributeSet,
    pub series_uid: Option<String>,
    pub position: Option<Vec3>,
    pub orientation: Option<[f64; 6]>,
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub spacing_between_slices: Option<f64>,
    pub instance_number: Option<i64>,
    pub rescale: Option<Rescale>,
}

macro_rules! decode_plane {
    ($decoded:expr, $opts:expr, $ty:ty) => {
        $decoded
            .to_ndarray_with_options::<$ty>($opts)
            .map(|arr| arr.slice_move(s![0, .., .., 0]).mapv(i64::from))
    };
}

impl Slice {
    /// Read a single-frame, single-sample image. Anything else is a foreign file.
    pub fn read(path: &Path) -> Result<Self> {
        let obj = open_file(path)
            .map_err(|e| ToolError::foreign(path, format!("not a DICOM file: {e}")))?;

        if !obj.has_element(tags::PIXEL_DATA) {
            return Err(ToolError::foreign(path, "no pixel data"));
        }
        let samples = obj.element_int(tags::SAMPLES_PER_PIXEL).unwrap_or(1);
        if samples != 1 {
            return Err(ToolError::foreign(
                path,
                format!("{samples} samples per pixel (only single-sample images are supported)"),
            ));
        }
        let frames = obj.element_int(tags::NUMBER_OF_FRAMES).unwrap_or(1);
        if frames != 1 {
            return Err(ToolError::foreign(
                path,
                format!("{frames} frames (only single-frame images are supported)"),
            ));
        }

        let decoded = obj
            .decode_pixel_data()
            .map_err(|e| ToolError::foreign(path, format!("cannot decode pixel data: {e}")))?;
        let sample_type =
            SampleType::from_pixel_format(decoded.bits_allocated(), decoded.pixel_representation())
                .ok_or_else(|| {
                    ToolError::foreign(
                        path,
                        format!("unsupported BitsAllocated {}", decoded.bits_allocated()),
                    )
                })?;

        // Stored values, no modality or VOI transform.
        let opts = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let plane = match sample_type {
            SampleType::U8 => decode_plane!(decoded, &opts, u8),
            SampleType::I8 => decode_plane!(decoded, &opts, i8),
            SampleType::U16 => decode_plane!(decoded, &opts, u16),
            SampleType::I16 => decode_plane!(decoded, &opts, i16),
            SampleType::U32 => decode_plane!(decoded, &opts, u32),
            SampleType::I32 => decode_plane!(decoded, &opts, i32),
        }
        .map_err(|e| ToolError::foreign(path, format!("cannot convert pixel data: {e}")))?;

        let position = obj
            .element_f64s(tags::IMAGE_POSITION_PATIENT)
            .filter(|v| v.len() == 3)
            .map(|v| [v[0], v[1], v[2]]);
        let orientation = obj
            .element_f64s(tags::IMAGE_ORIENTATION_PATIENT)
            .filter(|v| v.len() == 6)
            .map(|v| [v[0], v[1], v[2], v[3], v[4], v[5]]);
        let pixel_spacing = obj
            .element_f64s(tags::PIXEL_SPACING)
            .filter(|v| v.len() == 2)
            .map(|v| [v[0], v[1]]);
        let rescale = match (
            obj.element_f64(tags::RESCALE_SLOPE),
            obj.element_f64(tags::RESCALE_INTERCEPT),
        ) {
            (None, None) => None,
            (slope, intercept) => Some(Rescale {
                slope: slope.unwrap_or(1.0),
                intercept: intercept.unwrap_or(0.0),
            }),
        };

        Ok(Slice {
            path: path.to_path_buf(),
            plane,
            sample_type,
            attributes: AttributeSet::from_dicom(&obj),
            file_meta: file_meta_attributes(obj.meta()),
            series_uid: obj.element_str(tags::SERIES_INSTANCE_UID),
            position,
            orientation,
            pixel_spacing,
            slice_thickness: obj.element_f64(tags::SLICE_THICKNESS),
            spacing_between_slices: obj.element_f64(tags::SPACING_BETWEEN_SLICES),
            instance_number: obj.element_int(tags::INSTANCE_NUMBER),
            rescale,
        })
    }

    /// `(rows, columns)`.
    pub fn dims(&self) -> (usize, usize) {
        self.plane.dim()
    }
}

/// How the slices of a series were put in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// Projection of ImagePositionPatient on the slice normal.
    Position,
    /// InstanceNumber, used when spatial data is missing.
    InstanceNumber,
    Single,
}

/// Ordered slices sharing series identity, dimensions and sample type.
#[derive(Debug, Clone)]
pub struct Series {
    dir: PathBuf,
    slices: Vec<Slice>,
    ordering: Ordering,
}

impl Series {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn first(&self) -> &Slice {
        &self.slices[0]
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn ordering(&self) -> Ordering {
        self.ordering
    }

    pub fn sample_type(&self) -> SampleType {
        self.first().sample_type
    }

    /// Attributes of the first ordered slice.
    pub fn header(&self) -> &AttributeSet {
        &self.first().attributes
    }

    pub fn file_meta(&self) -> &AttributeSet {
        &self.first().file_meta
    }
}

/// Loads one series directory.
#[derive(Debug, Clone)]
pub struct SeriesLoader {
    dir: PathBuf,
    recursive: bool,
}

impl SeriesLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SeriesLoader {
            dir: dir.into(),
            recursive: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Regular, non-hidden files in name order.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Err(ToolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{:?} is not a directory", self.dir),
            )));
        }
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name()))
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    pub fn load(&self) -> Result<Series> {
        let files = self.files()?;
        if files.is_empty() {
            return Err(ToolError::EmptySeries(self.dir.clone()));
        }
        info!("Reading {} file(s) from {:?}", files.len(), self.dir);

        // Parse in parallel, report the first failure in name order.
        let results: Vec<Result<Slice>> = files.par_iter().map(|p| Slice::read(p)).collect();
        let slices = results.into_iter().collect::<Result<Vec<_>>>()?;

        check_consistency(&slices)?;
        let (slices, ordering) = order_slices(slices)?;
        debug!("Ordered {} slice(s) by {:?}", slices.len(), ordering);

        Ok(Series {
            dir: self.dir.clone(),
            slices,
            ordering,
        })
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map_or(false, |s| s.starts_with('.'))
}

/// Most frequent value; ties go to the value seen first.
fn majority<T: Eq + Hash + Clone>(values: &[T]) -> Option<T> {
    let mut counts: HashMap<&T, usize> = HashMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let best = counts.values().copied().max()?;
    values.iter().find(|v| counts[v] == best).cloned()
}

fn check_consistency(slices: &[Slice]) -> Result<()> {
    let uids: Vec<Option<String>> = slices.iter().map(|s| s.series_uid.clone()).collect();
    let dims: Vec<(usize, usize)> = slices.iter().map(Slice::dims).collect();
    let types: Vec<SampleType> = slices.iter().map(|s| s.sample_type).collect();

    let uid = majority(&uids).flatten();
    let dim = majority(&dims);
    let ty = majority(&types);

    for slice in slices {
        if slice.series_uid != uid {
            return Err(ToolError::foreign(
                &slice.path,
                format!(
                    "SeriesInstanceUID {:?} differs from the series {:?}",
                    slice.series_uid, uid
                ),
            ));
        }
        if Some(slice.dims()) != dim {
            return Err(ToolError::foreign(
                &slice.path,
                format!("dimensions {:?} differ from the series {:?}", slice.dims(), dim),
            ));
        }
        if Some(slice.sample_type) != ty {
            return Err(ToolError::foreign(
                &slice.path,
                format!(
                    "sample type {} differs from the series",
                    slice.sample_type
                ),
            ));
        }
    }

    // One scl_slope/scl_inter pair describes the whole volume.
    let effective = |s: &Slice| s.rescale.filter(|r| !r.is_identity());
    if let Some(first) = slices.first() {
        if let Some(odd) = slices.iter().find(|s| effective(s) != effective(first)) {
            return Err(ToolError::foreign(
                &odd.path,
                format!(
                    "RescaleSlope/RescaleIntercept {:?} differ from {:?} in {:?}",
                    effective(odd),
                    effective(first),
                    first.path
                ),
            ));
        }
    }
    Ok(())
}

fn orientations_agree(a: &[f64; 6], b: &[f64; 6]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() <= GEOMETRY_TOLERANCE)
}

fn order_by_position(slices: Vec<Slice>, normal: Vec3) -> Result<(Vec<Slice>, Ordering)> {
    let mut keyed: Vec<(f64, Slice)> = slices
        .into_iter()
        .map(|s| (dot(s.position.unwrap_or_default(), normal), s))
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    for pair in keyed.windows(2) {
        if (pair[1].0 - pair[0].0).abs() < GEOMETRY_TOLERANCE {
            return Err(ToolError::AmbiguousOrdering {
                first: pair[0].1.path.clone(),
                second: pair[1].1.path.clone(),
                position: pair[0].0,
            });
        }
    }
    Ok((keyed.into_iter().map(|(_, s)| s).collect(), Ordering::Position))
}

fn order_slices(mut slices: Vec<Slice>) -> Result<(Vec<Slice>, Ordering)> {
    if slices.len() == 1 {
        return Ok((slices, Ordering::Single));
    }

    let spatial = slices
        .iter()
        .all(|s| s.position.is_some() && s.orientation.is_some());
    if spatial {
        let reference = slices[0].orientation.unwrap_or_default();
        if let Some(odd) = slices
            .iter()
            .find(|s| !s.orientation.map_or(false, |o| orientations_agree(&o, &reference)))
        {
            return Err(ToolError::Geometry(format!(
                "ImageOrientationPatient of {:?} differs from the rest of the series",
                odd.path
            )));
        }
        let normal = cross(
            [reference[0], reference[1], reference[2]],
            [reference[3], reference[4], reference[5]],
        );
        if norm(normal) >= GEOMETRY_TOLERANCE {
            return order_by_position(slices, normal);
        }
        warn!(
            "ImageOrientationPatient {:?} has parallel row and column directions",
            reference
        );
    }

    if slices.iter().all(|s| s.instance_number.is_some()) {
        warn!("No usable slice positions; ordering slices by InstanceNumber");
        slices.sort_by_key(|s| s.instance_number);
        for pair in slices.windows(2) {
            if pair[0].instance_number == pair[1].instance_number {
                return Err(ToolError::AmbiguousOrdering {
                    first: pair[0].path.clone(),
                    second: pair[1].path.clone(),
                    position: pair[0].instance_number.unwrap_or_default() as f64,
                });
            }
        }
        return Ok((slices, Ordering::InstanceNumber));
    }

    Err(ToolError::Geometry(
        "slices carry neither ImagePositionPatient/ImageOrientationPatient nor InstanceNumber"
            .to_string(),
    ))
}
