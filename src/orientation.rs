//
// orientation.rs
// Dicom-Volume-Tools-rs
//
// Lossless reorientation of volumes by axis permutation and flipping, driven by three-letter axis codes.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt;
use std::str::FromStr;

use ndarray::Axis;

use crate::error::{Result, ToolError};
use crate::geometry::{add, cross, dot, scale, Geometry, GEOMETRY_TOLERANCE};
use crate::volume::Volume;

/// Letters name the anatomical direction in which each array index increases.
/// In patient coordinates +x is Left, +y is Posterior and +z is Superior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisCodes([char; 3]);

/// Default target of `--reorient`.
pub const CANONICAL: AxisCodes = AxisCodes(['L', 'A', 'S']);

fn world_axis(code: char) -> Option<(usize, bool)> {
    match code {
        'L' => Some((0, true)),
        'R' => Some((0, false)),
        'P' => Some((1, true)),
        'A' => Some((1, false)),
        'S' => Some((2, true)),
        'I' => Some((2, false)),
        _ => None,
    }
}

fn code_for(axis: usize, positive: bool) -> char {
    match (axis, positive) {
        (0, true) => 'L',
        (0, false) => 'R',
        (1, true) => 'P',
        (1, false) => 'A',
        (2, true) => 'S',
        _ => 'I',
    }
}

impl AxisCodes {
    pub fn codes(&self) -> [char; 3] {
        self.0
    }

    /// Codes describing the current layout of `geometry`.
    pub fn of(geometry: &Geometry) -> Result<Self> {
        let axes = dominant_axes(geometry)?;
        Ok(AxisCodes([
            code_for(axes[0].0, axes[0].1),
            code_for(axes[1].0, axes[1].1),
            code_for(axes[2].0, axes[2].1),
        ]))
    }
}

impl FromStr for AxisCodes {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        let letters: Vec<char> = s.trim().chars().map(|c| c.to_ascii_uppercase()).collect();
        let invalid = || ToolError::Geometry(format!("invalid axis codes {s:?} (expected e.g. LAS, RAS, LPS)"));
        if letters.len() != 3 {
            return Err(invalid());
        }
        let mut seen = [false; 3];
        for &c in &letters {
            let (axis, _) = world_axis(c).ok_or_else(invalid)?;
            if seen[axis] {
                return Err(invalid());
            }
            seen[axis] = true;
        }
        Ok(AxisCodes([letters[0], letters[1], letters[2]]))
    }
}

impl fmt::Display for AxisCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.0[0], self.0[1], self.0[2])
    }
}

/// For each array axis: the world axis it points along most and whether it points the positive way.
fn dominant_axes(geometry: &Geometry) -> Result<[(usize, bool); 3]> {
    let direction = geometry.direction();
    let det = dot(cross(direction[0], direction[1]), direction[2]);
    if det.abs() < GEOMETRY_TOLERANCE {
        return Err(ToolError::Geometry("singular direction matrix".to_string()));
    }

    let mut result = [(0, true); 3];
    let mut used = [false; 3];
    for (axis, d) in direction.iter().enumerate() {
        let world = (0..3)
            .max_by(|&a, &b| d[a].abs().total_cmp(&d[b].abs()))
            .unwrap_or(0);
        if used[world] {
            return Err(ToolError::Geometry(format!(
                "array axes map to the same world axis {world}; cannot reorient"
            )));
        }
        used[world] = true;
        result[axis] = (world, d[world] > 0.0);
    }
    Ok(result)
}

/// Axis permutation and flips: target axis `t` reads source axis `perm[t]`, reversed when `flip[t]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientationTransform {
    pub perm: [usize; 3],
    pub flip: [bool; 3],
}

impl OrientationTransform {
    pub fn identity() -> Self {
        OrientationTransform {
            perm: [0, 1, 2],
            flip: [false; 3],
        }
    }

    /// Transform taking a volume with `geometry` to the `target` codes.
    pub fn between(geometry: &Geometry, target: AxisCodes) -> Result<Self> {
        let current = dominant_axes(geometry)?;
        let mut perm = [0; 3];
        let mut flip = [false; 3];
        for (t, code) in target.0.iter().enumerate() {
            let (world, positive) = world_axis(*code)
                .ok_or_else(|| ToolError::Geometry(format!("invalid axis code {code}")))?;
            let source = current
                .iter()
                .position(|(w, _)| *w == world)
                .ok_or_else(|| ToolError::Geometry(format!("no array axis along world axis {world}")))?;
            perm[t] = source;
            flip[t] = current[source].1 != positive;
        }
        Ok(OrientationTransform { perm, flip })
    }

    pub fn is_identity(&self) -> bool {
        *self == OrientationTransform::identity()
    }

    pub fn inverse(&self) -> Self {
        let mut inv = OrientationTransform::identity();
        for t in 0..3 {
            inv.perm[self.perm[t]] = t;
            inv.flip[self.perm[t]] = self.flip[t];
        }
        inv
    }

    /// Permute and flip the voxels and recompute the geometry. No interpolation.
    pub fn apply(&self, volume: Volume) -> Result<Volume> {
        if self.is_identity() {
            return Ok(volume);
        }
        let shape = volume.data.shape().to_vec();
        let spacing = volume.geometry.spacing();
        let direction = volume.geometry.direction();
        let mut origin = volume.geometry.origin();

        let mut view = volume.data.view().permuted_axes(self.perm);
        for t in 0..3 {
            if self.flip[t] {
                view.invert_axis(Axis(t));
            }
        }
        let data = view.as_standard_layout().into_owned();

        let mut new_spacing = [0.0; 3];
        let mut new_direction = [[0.0; 3]; 3];
        for t in 0..3 {
            let source = self.perm[t];
            new_spacing[t] = spacing[source];
            new_direction[t] = direction[source];
            if self.flip[t] {
                let extent = spacing[source] * (shape[source].saturating_sub(1)) as f64;
                origin = add(origin, scale(direction[source], extent));
                new_direction[t] = scale(direction[source], -1.0);
            }
        }
        let geometry = Geometry::new(new_spacing, new_direction, origin)?;

        Ok(Volume {
            data,
            geometry,
            ..volume
        })
    }
}

/// Reorient `volume` to `target`, returning the transform that was applied.
pub fn reorient(volume: Volume, target: AxisCodes) -> Result<(Volume, OrientationTransform)> {
    let transform = OrientationTransform::between(&volume.geometry, target)?;
    if transform.is_identity() {
        tracing::debug!("Volume already in {} orientation", target);
    } else {
        tracing::info!(
            "Reorienting {} -> {}",
            AxisCodes::of(&volume.geometry)?,
            target
        );
    }
    Ok((transform.apply(volume)?, transform))
}
