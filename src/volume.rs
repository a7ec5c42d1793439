//
// volume.rs
// Dicom-Volume-Tools-rs
//
// In-memory 3D volume: stored voxel values, their sample type, geometry, rescale and carried attributes.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;

use dicom_pixeldata::PixelRepresentation;
use ndarray::{Array3, Axis};

use crate::attributes::AttributeSet;
use crate::geometry::Geometry;
use crate::series::Series;

/// Stored width and signedness of voxel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl SampleType {
    /// Map BitsAllocated / PixelRepresentation of a decoded image.
    pub fn from_pixel_format(bits_allocated: u16, representation: PixelRepresentation) -> Option<Self> {
        let signed = representation == PixelRepresentation::Signed;
        match (bits_allocated, signed) {
            (8, false) => Some(SampleType::U8),
            (8, true) => Some(SampleType::I8),
            (16, false) => Some(SampleType::U16),
            (16, true) => Some(SampleType::I16),
            (32, false) => Some(SampleType::U32),
            (32, true) => Some(SampleType::I32),
            _ => None,
        }
    }

    /// NIfTI-1 datatype code.
    pub fn nifti_code(self) -> i16 {
        match self {
            SampleType::U8 => 2,
            SampleType::I16 => 4,
            SampleType::I32 => 8,
            SampleType::I8 => 256,
            SampleType::U16 => 512,
            SampleType::U32 => 768,
        }
    }

    pub fn from_nifti_code(code: i16) -> Option<Self> {
        match code {
            2 => Some(SampleType::U8),
            4 => Some(SampleType::I16),
            8 => Some(SampleType::I32),
            256 => Some(SampleType::I8),
            512 => Some(SampleType::U16),
            768 => Some(SampleType::U32),
            _ => None,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            SampleType::U8 | SampleType::I8 => 8,
            SampleType::U16 | SampleType::I16 => 16,
            SampleType::U32 | SampleType::I32 => 32,
        }
    }

    pub fn bytes(self) -> usize {
        usize::from(self.bits() / 8)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, SampleType::I8 | SampleType::I16 | SampleType::I32)
    }

    pub fn min_value(self) -> i64 {
        match self {
            SampleType::U8 | SampleType::U16 | SampleType::U32 => 0,
            SampleType::I8 => i64::from(i8::MIN),
            SampleType::I16 => i64::from(i16::MIN),
            SampleType::I32 => i64::from(i32::MIN),
        }
    }

    pub fn max_value(self) -> i64 {
        match self {
            SampleType::U8 => i64::from(u8::MAX),
            SampleType::I8 => i64::from(i8::MAX),
            SampleType::U16 => i64::from(u16::MAX),
            SampleType::I16 => i64::from(i16::MAX),
            SampleType::U32 => i64::from(u32::MAX),
            SampleType::I32 => i64::from(i32::MAX),
        }
    }

    pub fn contains(self, value: i64) -> bool {
        (self.min_value()..=self.max_value()).contains(&value)
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleType::U8 => "uint8",
            SampleType::I8 => "int8",
            SampleType::U16 => "uint16",
            SampleType::I16 => "int16",
            SampleType::U32 => "uint32",
            SampleType::I32 => "int32",
        };
        f.write_str(name)
    }
}

/// Linear map from stored values to real-world values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Rescale {
    pub fn is_identity(&self) -> bool {
        self.slope == 1.0 && self.intercept == 0.0
    }
}

/// Voxels indexed `[column, row, slice]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<i64>,
    pub sample_type: SampleType,
    pub geometry: Geometry,
    pub rescale: Option<Rescale>,
    pub attributes: AttributeSet,
}

impl Volume {
    pub fn new(data: Array3<i64>, sample_type: SampleType, geometry: Geometry) -> Self {
        Volume {
            data,
            sample_type,
            geometry,
            rescale: None,
            attributes: AttributeSet::new(),
        }
    }

    /// Stack the planes of an ordered series; plane `[row, column]` becomes `[column, row]`.
    pub fn from_series(series: &Series, geometry: Geometry) -> Self {
        let first = series.first();
        let (rows, columns) = first.plane.dim();
        let mut data = Array3::<i64>::zeros((columns, rows, series.len()));
        for (k, slice) in series.slices().iter().enumerate() {
            data.index_axis_mut(Axis(2), k).assign(&slice.plane.t());
        }

        // Loading a series guarantees one rescale for every slice.
        Volume {
            data,
            sample_type: series.sample_type(),
            geometry,
            rescale: first.rescale.filter(|r| !r.is_identity()),
            attributes: series.header().clone(),
        }
    }

    /// `(columns, rows, slices)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Smallest and largest stored value.
    pub fn value_range(&self) -> Option<(i64, i64)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nifti_codes_round_trip() {
        for ty in [
            SampleType::U8,
            SampleType::I8,
            SampleType::U16,
            SampleType::I16,
            SampleType::U32,
            SampleType::I32,
        ] {
            assert_eq!(SampleType::from_nifti_code(ty.nifti_code()), Some(ty));
        }
        assert_eq!(SampleType::from_nifti_code(16), None);
    }

    #[test]
    fn pixel_format_mapping() {
        assert_eq!(
            SampleType::from_pixel_format(16, PixelRepresentation::Signed),
            Some(SampleType::I16)
        );
        assert_eq!(
            SampleType::from_pixel_format(8, PixelRepresentation::Unsigned),
            Some(SampleType::U8)
        );
        assert_eq!(SampleType::from_pixel_format(1, PixelRepresentation::Unsigned), None);
        assert!(SampleType::U16.contains(65535));
        assert!(!SampleType::I8.contains(128));
    }

    #[test]
    fn value_range() {
        let data = Array3::from_shape_vec((2, 1, 2), vec![3, -1, 7, 0]).unwrap();
        let volume = Volume::new(data, SampleType::I16, Geometry::identity());
        assert_eq!(volume.value_range(), Some((-1, 7)));
        assert_eq!(volume.dims(), (2, 1, 2));
    }
}
