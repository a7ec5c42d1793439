//
// geometry.rs
// Dicom-Volume-Tools-rs
//
// Voxel spacing, axis directions and origin in DICOM patient coordinates (LPS), derived from ordered slices.
//
// Thales Matheus Mendonça Santos - November 2025

use tracing::warn;

use crate::error::{Result, ToolError};
use crate::series::{Ordering, Series};

pub type Vec3 = [f64; 3];

/// Tolerance for orthonormality checks and position comparisons.
pub const GEOMETRY_TOLERANCE: f64 = 1e-4;

/// Relative deviation of slice gaps that triggers a warning.
const GAP_TOLERANCE: f64 = 0.01;

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn normalize(a: Vec3) -> Option<Vec3> {
    let n = norm(a);
    (n.is_finite() && n > GEOMETRY_TOLERANCE).then(|| scale(a, 1.0 / n))
}

fn is_finite(a: Vec3) -> bool {
    a.iter().all(|v| v.is_finite())
}

/// Spatial layout of a volume. `direction[a]` is the unit vector along array axis `a`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    spacing: Vec3,
    direction: [Vec3; 3],
    origin: Vec3,
}

impl Geometry {
    /// Validated constructor: positive finite spacing, orthonormal directions, finite origin.
    pub fn new(spacing: Vec3, direction: [Vec3; 3], origin: Vec3) -> Result<Self> {
        if !spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(ToolError::Geometry(format!(
                "spacing must be positive and finite, got {spacing:?}"
            )));
        }
        if !is_finite(origin) {
            return Err(ToolError::Geometry(format!("non-finite origin {origin:?}")));
        }
        for (axis, d) in direction.iter().enumerate() {
            if !is_finite(*d) || (norm(*d) - 1.0).abs() > GEOMETRY_TOLERANCE {
                return Err(ToolError::Geometry(format!(
                    "direction of axis {axis} is not a unit vector: {d:?}"
                )));
            }
        }
        for (a, b) in [(0, 1), (0, 2), (1, 2)] {
            if dot(direction[a], direction[b]).abs() > GEOMETRY_TOLERANCE {
                return Err(ToolError::Geometry(format!(
                    "directions of axes {a} and {b} are not orthogonal"
                )));
            }
        }
        Ok(Geometry {
            spacing,
            direction,
            origin,
        })
    }

    pub fn identity() -> Self {
        Geometry {
            spacing: [1.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            origin: [0.0; 3],
        }
    }

    /// Identity directions with the given spacing and origin.
    pub fn axis_aligned(spacing: Vec3, origin: Vec3) -> Result<Self> {
        Geometry::new(spacing, Geometry::identity().direction, origin)
    }

    pub fn spacing(&self) -> Vec3 {
        self.spacing
    }

    pub fn direction(&self) -> [Vec3; 3] {
        self.direction
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn row_direction(&self) -> Vec3 {
        self.direction[0]
    }

    pub fn column_direction(&self) -> Vec3 {
        self.direction[1]
    }

    pub fn normal(&self) -> Vec3 {
        self.direction[2]
    }

    /// World position of the first voxel of plane `k`.
    pub fn slice_position(&self, k: usize) -> Vec3 {
        add(self.origin, scale(self.direction[2], k as f64 * self.spacing[2]))
    }

    /// Determinant of the direction matrix (+1 right handed, -1 left handed).
    pub fn handedness(&self) -> f64 {
        dot(cross(self.direction[0], self.direction[1]), self.direction[2])
    }

    /// 4x4 voxel-to-world matrix in LPS.
    pub fn affine(&self) -> [[f64; 4]; 4] {
        let mut m = [[0.0; 4]; 4];
        for row in 0..3 {
            for axis in 0..3 {
                m[row][axis] = self.direction[axis][row] * self.spacing[axis];
            }
            m[row][3] = self.origin[row];
        }
        m[3][3] = 1.0;
        m
    }

    /// Derive the geometry of an ordered series from its orientation, pixel spacing and positions.
    pub fn from_series(series: &Series) -> Result<Self> {
        let first = series.first();
        let orientation = first.orientation.ok_or_else(|| {
            ToolError::Geometry(format!(
                "{:?} has no ImageOrientationPatient",
                first.path
            ))
        })?;
        let row = normalize([orientation[0], orientation[1], orientation[2]]);
        let col = normalize([orientation[3], orientation[4], orientation[5]]);
        let (row, col) = match (row, col) {
            (Some(r), Some(c)) if dot(r, c).abs() <= GEOMETRY_TOLERANCE => (r, c),
            _ => {
                return Err(ToolError::Geometry(format!(
                    "degenerate ImageOrientationPatient {orientation:?}"
                )))
            }
        };
        let normal = cross(row, col);

        let [dx, dy] = in_plane_spacing(series);
        let dz = match series.ordering() {
            Ordering::Position if series.len() > 1 => mean_gap(series, normal)?,
            Ordering::Position | Ordering::Single => through_plane_spacing(series),
            Ordering::InstanceNumber => {
                warn!("Slices ordered by InstanceNumber; slice spacing taken from the header");
                through_plane_spacing(series)
            }
        };
        let origin = first.position.unwrap_or_else(|| {
            warn!("No ImagePositionPatient on the first slice, origin set to zero");
            [0.0; 3]
        });

        Geometry::new([dx, dy, dz], [row, col, normal], origin)
    }

    /// Identity directions with whatever spacing the headers provide.
    pub fn fallback(series: &Series) -> Result<Self> {
        let [dx, dy] = in_plane_spacing(series);
        let dz = through_plane_spacing(series);
        let origin = series.first().position.unwrap_or([0.0; 3]);
        Geometry::axis_aligned([dx, dy, dz], origin)
    }
}

/// `[x, y]` spacing: PixelSpacing is stored as `[row spacing, column spacing]`.
fn in_plane_spacing(series: &Series) -> [f64; 2] {
    match series.first().pixel_spacing {
        Some([row_spacing, col_spacing]) if row_spacing > 0.0 && col_spacing > 0.0 => {
            [col_spacing, row_spacing]
        }
        _ => {
            warn!("No usable PixelSpacing, assuming 1 mm");
            [1.0, 1.0]
        }
    }
}

fn through_plane_spacing(series: &Series) -> f64 {
    let first = series.first();
    first
        .spacing_between_slices
        .filter(|s| *s > 0.0)
        .or(first.slice_thickness.filter(|s| *s > 0.0))
        .unwrap_or(1.0)
}

fn mean_gap(series: &Series, normal: Vec3) -> Result<f64> {
    let projections = series
        .slices()
        .iter()
        .map(|s| {
            s.position.map(|p| dot(p, normal)).ok_or_else(|| {
                ToolError::Geometry(format!("{:?} has no ImagePositionPatient", s.path))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let gaps: Vec<f64> = projections.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if !(mean.is_finite() && mean > 0.0) {
        return Err(ToolError::Geometry(format!("invalid slice spacing {mean}")));
    }
    if gaps
        .iter()
        .any(|g| ((g - mean) / mean).abs() > GAP_TOLERANCE)
    {
        warn!(
            "Slice gaps are not uniform (mean {:.4} mm); using the mean spacing",
            mean
        );
    }
    Ok(mean)
}
