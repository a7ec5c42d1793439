//
// codec.rs
// Dicom-Volume-Tools-rs
//
// NIfTI-1 single-file reading and writing on the nifti crate, converting between LPS and RAS world coordinates.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::MultiGzDecoder;
use ndarray::{Array3, ShapeBuilder};
use nifti::writer::WriterOptions;
use nifti::{Endianness, InMemNiftiObject, NiftiHeader, NiftiObject};
use tracing::{debug, info};

use crate::config::ensure_writable;
use crate::error::{Result, ToolError};
use crate::geometry::{Geometry, Vec3};
use crate::volume::{Rescale, SampleType, Volume};

const HEADER_SIZE: usize = 348;
/// Header plus the four-byte extension flag.
const DATA_OFFSET: usize = 352;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const NIFTI_UNITS_MM: u8 = 2;
const XFORM_SCANNER_ANAT: i16 = 1;

fn codec_err(message: impl Into<String>) -> ToolError {
    ToolError::Codec(message.into())
}

/// LPS <-> RAS: negate x and y.
fn flip_xy(v: Vec3) -> Vec3 {
    [-v[0], -v[1], v[2]]
}

/// Quaternion parameters `(b, c, d, qfac)` of an orthonormal matrix given by its columns.
fn to_quaternion(columns: [Vec3; 3]) -> (f64, f64, f64, f64) {
    let [c0, c1, mut c2] = columns;
    let det = crate::geometry::dot(crate::geometry::cross(c0, c1), c2);
    let qfac = if det > 0.0 {
        1.0
    } else {
        c2 = [-c2[0], -c2[1], -c2[2]];
        -1.0
    };
    let (r11, r21, r31) = (c0[0], c0[1], c0[2]);
    let (r12, r22, r32) = (c1[0], c1[1], c1[2]);
    let (r13, r23, r33) = (c2[0], c2[1], c2[2]);

    let trace = r11 + r22 + r33 + 1.0;
    let (b, c, d) = if trace > 0.5 {
        let a = 0.5 * trace.sqrt();
        (
            0.25 * (r32 - r23) / a,
            0.25 * (r13 - r31) / a,
            0.25 * (r21 - r12) / a,
        )
    } else {
        let xd = 1.0 + r11 - (r22 + r33);
        let yd = 1.0 + r22 - (r11 + r33);
        let zd = 1.0 + r33 - (r11 + r22);
        let (a, b, c, d) = if xd > 1.0 {
            let b = 0.5 * xd.sqrt();
            (0.25 * (r32 - r23) / b, b, 0.25 * (r12 + r21) / b, 0.25 * (r13 + r31) / b)
        } else if yd > 1.0 {
            let c = 0.5 * yd.sqrt();
            (0.25 * (r13 - r31) / c, 0.25 * (r12 + r21) / c, c, 0.25 * (r23 + r32) / c)
        } else {
            let d = 0.5 * zd.sqrt();
            (0.25 * (r21 - r12) / d, 0.25 * (r13 + r31) / d, 0.25 * (r23 + r32) / d, d)
        };
        // Keep the scalar part non-negative so it can be recovered from b, c, d.
        if a < 0.0 {
            (-b, -c, -d)
        } else {
            (b, c, d)
        }
    };
    (b, c, d, qfac)
}

/// Columns of the rotation described by quaternion `(b, c, d)` and `qfac`.
fn from_quaternion(b: f64, c: f64, d: f64, qfac: f64) -> [Vec3; 3] {
    let (mut b, mut c, mut d) = (b, c, d);
    let sum = b * b + c * c + d * d;
    let a = if 1.0 - sum < 1e-7 {
        let n = sum.sqrt();
        b /= n;
        c /= n;
        d /= n;
        0.0
    } else {
        (1.0 - sum).sqrt()
    };
    let qfac = if qfac < 0.0 { -1.0 } else { 1.0 };
    [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c + a * d),
            2.0 * (b * d - a * c),
        ],
        [
            2.0 * (b * c - a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d + a * b),
        ],
        [
            qfac * 2.0 * (b * d + a * c),
            qfac * 2.0 * (c * d - a * b),
            qfac * (a * a + d * d - c * c - b * b),
        ],
    ]
}

fn build_header(volume: &Volume) -> Result<NiftiHeader> {
    let (nx, ny, nz) = volume.dims();
    let mut dim = [1u16; 8];
    dim[0] = 3;
    for (slot, n) in dim[1..4].iter_mut().zip([nx, ny, nz]) {
        // NIfTI-1 dimensions are signed 16-bit on disk.
        *slot = i16::try_from(n)
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as u16)
            .ok_or_else(|| codec_err(format!("dimension {n} does not fit NIfTI-1")))?;
    }

    let geometry = &volume.geometry;
    let spacing = geometry.spacing();
    let ras_columns = geometry.direction().map(flip_xy);
    let ras_origin = flip_xy(geometry.origin());
    let (qb, qc, qd, qfac) = to_quaternion(ras_columns);
    let srow = |row: usize| {
        [
            (ras_columns[0][row] * spacing[0]) as f32,
            (ras_columns[1][row] * spacing[1]) as f32,
            (ras_columns[2][row] * spacing[2]) as f32,
            ras_origin[row] as f32,
        ]
    };
    let rescale = volume.rescale.unwrap_or(Rescale {
        slope: 0.0,
        intercept: 0.0,
    });

    Ok(NiftiHeader {
        dim,
        datatype: volume.sample_type.nifti_code(),
        bitpix: volume.sample_type.bits() as i16,
        pixdim: [
            qfac as f32,
            spacing[0] as f32,
            spacing[1] as f32,
            spacing[2] as f32,
            1.0,
            1.0,
            1.0,
            1.0,
        ],
        vox_offset: DATA_OFFSET as f32,
        scl_slope: rescale.slope as f32,
        scl_inter: rescale.intercept as f32,
        xyzt_units: NIFTI_UNITS_MM,
        qform_code: XFORM_SCANNER_ANAT,
        sform_code: XFORM_SCANNER_ANAT,
        quatern_b: qb as f32,
        quatern_c: qc as f32,
        quatern_d: qd as f32,
        quatern_x: ras_origin[0] as f32,
        quatern_y: ras_origin[1] as f32,
        quatern_z: ras_origin[2] as f32,
        srow_x: srow(0),
        srow_y: srow(1),
        srow_z: srow(2),
        endianness: Endianness::Little,
        ..NiftiHeader::default()
    })
}

fn check_range(volume: &Volume) -> Result<()> {
    let ty = volume.sample_type;
    if let Some((lo, hi)) = volume.value_range() {
        if !ty.contains(lo) || !ty.contains(hi) {
            return Err(codec_err(format!(
                "voxel values [{lo}, {hi}] do not fit sample type {ty}"
            )));
        }
    }
    Ok(())
}

macro_rules! write_as {
    ($options:expr, $data:expr, $ty:ty) => {
        $options.write_nifti(&$data.mapv(|v| v as $ty))
    };
}

/// Write through the `nifti` writer; a `.gz` extension selects gzip.
fn write_file(volume: &Volume, path: &Path) -> Result<()> {
    check_range(volume)?;
    let header = build_header(volume)?;
    let options = WriterOptions::new(path).reference_header(&header);
    let data = &volume.data;
    let written = match volume.sample_type {
        SampleType::U8 => write_as!(options, data, u8),
        SampleType::I8 => write_as!(options, data, i8),
        SampleType::U16 => write_as!(options, data, u16),
        SampleType::I16 => write_as!(options, data, i16),
        SampleType::U32 => write_as!(options, data, u32),
        SampleType::I32 => write_as!(options, data, i32),
    };
    written.map_err(|e| codec_err(format!("cannot write {path:?}: {e}")))
}

fn volume_suffix(compress: bool) -> &'static str {
    if compress {
        ".nii.gz"
    } else {
        ".nii"
    }
}

/// Serialise `volume` as a single-file NIfTI-1 image, gzip compressed when asked.
pub fn encode(volume: &Volume, compress: bool) -> Result<Vec<u8>> {
    let scratch = tempfile::tempdir()?;
    let path = scratch.path().join(format!("volume{}", volume_suffix(compress)));
    write_file(volume, &path)?;
    Ok(std::fs::read(&path)?)
}

fn read_samples<E: ByteOrder>(raw: &[u8], ty: SampleType) -> Vec<i64> {
    match ty {
        SampleType::U8 => raw.iter().map(|b| i64::from(*b)).collect(),
        SampleType::I8 => raw.iter().map(|b| i64::from(*b as i8)).collect(),
        SampleType::U16 => raw.chunks_exact(2).map(|c| i64::from(E::read_u16(c))).collect(),
        SampleType::I16 => raw.chunks_exact(2).map(|c| i64::from(E::read_i16(c))).collect(),
        SampleType::U32 => raw.chunks_exact(4).map(|c| i64::from(E::read_u32(c))).collect(),
        SampleType::I32 => raw.chunks_exact(4).map(|c| i64::from(E::read_i32(c))).collect(),
    }
}

/// Shape, sample type and byte length of the image data, checked against the
/// `available` bytes of the file.
struct DataLayout {
    shape: (usize, usize, usize),
    sample_type: SampleType,
    len: usize,
}

fn data_layout(header: &NiftiHeader, available: usize) -> Result<DataLayout> {
    let dim = header.dim;
    let ndim = usize::from(dim[0]);
    if !(3..=7).contains(&ndim) || dim[4..=ndim].iter().any(|d| *d > 1) {
        return Err(codec_err(format!("only 3D images are supported (dim = {dim:?})")));
    }
    // Negative on-disk dimensions read back above i16::MAX.
    if dim[1..4].iter().any(|d| *d < 1 || *d > i16::MAX as u16) {
        return Err(codec_err(format!("invalid dimensions {dim:?}")));
    }
    let shape = (usize::from(dim[1]), usize::from(dim[2]), usize::from(dim[3]));

    let code = header.datatype;
    let sample_type = SampleType::from_nifti_code(code)
        .ok_or_else(|| codec_err(format!("unsupported NIfTI datatype {code}")))?;
    if header.bitpix != sample_type.bits() as i16 {
        return Err(codec_err(format!(
            "bitpix {} does not match datatype {code}",
            header.bitpix
        )));
    }

    let vox_offset = header.vox_offset;
    if !vox_offset.is_finite()
        || vox_offset.fract() != 0.0
        || vox_offset < DATA_OFFSET as f32
        || vox_offset > available as f32
    {
        return Err(codec_err(format!(
            "vox_offset {vox_offset} outside the {available}-byte file"
        )));
    }
    let start = vox_offset as usize;
    let len = shape
        .0
        .checked_mul(shape.1)
        .and_then(|n| n.checked_mul(shape.2))
        .and_then(|n| n.checked_mul(sample_type.bytes()));
    match len.and_then(|n| n.checked_add(start)) {
        Some(end) if end <= available => Ok(DataLayout {
            shape,
            sample_type,
            len: end - start,
        }),
        Some(end) => Err(codec_err(format!(
            "truncated image data: expected {end} bytes, found {available}"
        ))),
        None => Err(codec_err(format!("image of {dim:?} voxels is too large"))),
    }
}

fn decode_geometry(header: &NiftiHeader) -> Result<Geometry> {
    let pixdim = header.pixdim.map(f64::from);

    let (spacing, ras_columns, ras_origin) = if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z].map(|r| r.map(f64::from));
        let mut spacing = [0.0; 3];
        let mut columns = [[0.0; 3]; 3];
        for axis in 0..3 {
            let column = [rows[0][axis], rows[1][axis], rows[2][axis]];
            let length = crate::geometry::norm(column);
            if !(length.is_finite() && length > 0.0) {
                return Err(codec_err(format!("sform column {axis} has zero length")));
            }
            spacing[axis] = length;
            columns[axis] = crate::geometry::scale(column, 1.0 / length);
        }
        (spacing, columns, [rows[0][3], rows[1][3], rows[2][3]])
    } else if header.qform_code > 0 {
        let columns = from_quaternion(
            f64::from(header.quatern_b),
            f64::from(header.quatern_c),
            f64::from(header.quatern_d),
            pixdim[0],
        );
        (
            [pixdim[1], pixdim[2], pixdim[3]],
            columns,
            [header.quatern_x, header.quatern_y, header.quatern_z].map(f64::from),
        )
    } else {
        debug!("No sform/qform; using pixdim with identity directions");
        (
            [pixdim[1], pixdim[2], pixdim[3]],
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [0.0; 3],
        )
    };

    Geometry::new(spacing, ras_columns.map(flip_xy), flip_xy(ras_origin))
        .map_err(|e| codec_err(format!("malformed geometry: {e}")))
}

/// Parse a NIfTI-1 image, gzip compressed or not, in either byte order.
pub fn decode(bytes: &[u8]) -> Result<Volume> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut raw = Vec::new();
        MultiGzDecoder::new(bytes)
            .read_to_end(&mut raw)
            .map_err(|e| codec_err(format!("gzip: {e}")))?;
        return decode(&raw);
    }

    if bytes.len() < HEADER_SIZE {
        return Err(codec_err("truncated NIfTI header"));
    }
    let header = NiftiHeader::from_reader(Cursor::new(bytes))
        .map_err(|e| codec_err(format!("not a NIfTI-1 header: {e}")))?;
    match &header.magic {
        b"n+1\0" => {}
        b"ni1\0" => {
            return Err(codec_err(
                "separate header/image (.hdr/.img) pairs are not supported",
            ))
        }
        _ => return Err(codec_err("not a NIfTI-1 file")),
    }
    let layout = data_layout(&header, bytes.len())?;

    let object = InMemNiftiObject::from_reader(Cursor::new(bytes))
        .map_err(|e| codec_err(format!("cannot read image data: {e}")))?;
    let raw = object
        .volume()
        .raw_data()
        .get(..layout.len)
        .ok_or_else(|| codec_err("image data shorter than its header declares"))?;
    let values = match header.endianness {
        Endianness::Little => read_samples::<LittleEndian>(raw, layout.sample_type),
        Endianness::Big => read_samples::<BigEndian>(raw, layout.sample_type),
    };
    // i varies fastest on disk.
    let data = Array3::from_shape_vec(layout.shape.f(), values)
        .map_err(|e| codec_err(e.to_string()))?;

    let geometry = decode_geometry(&header)?;

    let slope = f64::from(header.scl_slope);
    let intercept = f64::from(header.scl_inter);
    let rescale = (slope.is_finite() && slope != 0.0)
        .then(|| Rescale {
            slope,
            intercept: if intercept.is_finite() { intercept } else { 0.0 },
        })
        .filter(|r| !r.is_identity());

    let mut volume = Volume::new(data, layout.sample_type, geometry);
    volume.rescale = rescale;
    Ok(volume)
}

/// Encode and write atomically next to `path`.
pub fn write_volume(volume: &Volume, path: &Path, compress: bool, force: bool) -> Result<()> {
    ensure_writable(path, force)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .suffix(volume_suffix(compress))
        .tempfile_in(parent)?;
    write_file(volume, staging.path())?;
    staging.persist(path).map_err(|e| ToolError::Io(e.error))?;

    let (nx, ny, nz) = volume.dims();
    info!(
        "Volume {}x{}x{} ({}) written to {:?}",
        nx, ny, nz, volume.sample_type, path
    );
    Ok(())
}

pub fn read_volume(path: &Path) -> Result<Volume> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}
