//
// writer.rs
// Dicom-Volume-Tools-rs
//
// Splits a volume into one DICOM file per slice, recomputing identity, geometry and pixel module elements.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::tags;
use ndarray::Axis;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::attributes::{format_decimal, AttributeSet};
use crate::error::{Result, ToolError};
use crate::geometry::dot;
use crate::header_store::EXPLICIT_VR_LITTLE_ENDIAN;
use crate::uid;
use crate::volume::{SampleType, Volume};

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
pub const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";

/// Elements the writer owns; values for them in the attribute set are replaced or dropped.
const DERIVED: &[Tag] = &[
    tags::NUMBER_OF_FRAMES,
    tags::PLANAR_CONFIGURATION,
    tags::SMALLEST_IMAGE_PIXEL_VALUE,
    tags::LARGEST_IMAGE_PIXEL_VALUE,
    tags::RESCALE_SLOPE,
    tags::RESCALE_INTERCEPT,
    tags::PIXEL_DATA,
];

/// SOP class for a modality when none is given.
pub fn sop_class_for_modality(modality: Option<&str>) -> &'static str {
    match modality.map(str::trim) {
        Some("CT") => CT_IMAGE_STORAGE,
        Some("MR") => MR_IMAGE_STORAGE,
        _ => SECONDARY_CAPTURE_IMAGE_STORAGE,
    }
}

fn slice_file_name(k: usize) -> String {
    format!("slice_{k:04}.dcm")
}

fn ds(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| format_decimal(*v)).collect())
}

fn text_or(attributes: &AttributeSet, tag: Tag, fallback: impl FnOnce() -> String) -> String {
    attributes.text(tag).unwrap_or_else(fallback)
}

/// Values shared by every slice of one written series.
struct SeriesContext {
    base: InMemDicomObject,
    sop_class: String,
    transfer_syntax: String,
    implementation_class_uid: Option<String>,
    implementation_version_name: Option<String>,
}

fn transfer_syntax_of(file_meta: &AttributeSet) -> String {
    match file_meta.text(tags::TRANSFER_SYNTAX_UID) {
        Some(ts) if ts == EXPLICIT_VR_LITTLE_ENDIAN || ts == IMPLICIT_VR_LITTLE_ENDIAN => ts,
        Some(other) => {
            warn!(
                "Transfer syntax {} cannot be written; using explicit VR little endian",
                other
            );
            EXPLICIT_VR_LITTLE_ENDIAN.to_string()
        }
        None => EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
    }
}

fn series_context(volume: &Volume, attributes: &AttributeSet, file_meta: &AttributeSet) -> Result<SeriesContext> {
    let (nx, ny, _) = volume.dims();
    let rows = u16::try_from(ny)
        .map_err(|_| ToolError::Geometry(format!("{ny} rows do not fit a DICOM image")))?;
    let columns = u16::try_from(nx)
        .map_err(|_| ToolError::Geometry(format!("{nx} columns do not fit a DICOM image")))?;

    let mut base = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    for attribute in attributes.iter() {
        if attribute.key.is_file_meta() || DERIVED.contains(&attribute.key.tag()) {
            continue;
        }
        base.put(attribute.to_element()?);
    }

    let modality = attributes.text(tags::MODALITY);
    let sop_class = text_or(attributes, tags::SOP_CLASS_UID, || {
        sop_class_for_modality(modality.as_deref()).to_string()
    });
    let study = text_or(attributes, tags::STUDY_INSTANCE_UID, uid::generate);
    let series = text_or(attributes, tags::SERIES_INSTANCE_UID, uid::generate);
    let frame_of_reference = text_or(attributes, tags::FRAME_OF_REFERENCE_UID, uid::generate);

    let put = |obj: &mut InMemDicomObject, tag, vr, value: PrimitiveValue| {
        obj.put(DataElement::new(tag, vr, value));
    };
    if modality.is_none() {
        put(&mut base, tags::MODALITY, VR::CS, PrimitiveValue::from("OT"));
    }
    for tag in [tags::PATIENT_NAME, tags::PATIENT_ID] {
        if attributes.text(tag).is_none() {
            let vr = if tag == tags::PATIENT_NAME { VR::PN } else { VR::LO };
            put(&mut base, tag, vr, PrimitiveValue::from("N/A"));
        }
    }
    put(&mut base, tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(sop_class.as_str()));
    put(&mut base, tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study.as_str()));
    put(&mut base, tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series.as_str()));
    put(
        &mut base,
        tags::FRAME_OF_REFERENCE_UID,
        VR::UI,
        PrimitiveValue::from(frame_of_reference.as_str()),
    );

    // Image pixel module.
    let ty = volume.sample_type;
    put(&mut base, tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16));
    put(
        &mut base,
        tags::PHOTOMETRIC_INTERPRETATION,
        VR::CS,
        PrimitiveValue::from("MONOCHROME2"),
    );
    put(&mut base, tags::ROWS, VR::US, PrimitiveValue::from(rows));
    put(&mut base, tags::COLUMNS, VR::US, PrimitiveValue::from(columns));
    put(&mut base, tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(ty.bits()));
    put(&mut base, tags::BITS_STORED, VR::US, PrimitiveValue::from(ty.bits()));
    put(&mut base, tags::HIGH_BIT, VR::US, PrimitiveValue::from(ty.bits() - 1));
    put(
        &mut base,
        tags::PIXEL_REPRESENTATION,
        VR::US,
        PrimitiveValue::from(u16::from(ty.is_signed())),
    );
    if let Some(rescale) = volume.rescale {
        put(&mut base, tags::RESCALE_SLOPE, VR::DS, ds(&[rescale.slope]));
        put(&mut base, tags::RESCALE_INTERCEPT, VR::DS, ds(&[rescale.intercept]));
    }

    // Geometry shared by all slices.
    let geometry = &volume.geometry;
    let [sx, sy, sz] = geometry.spacing();
    let (row, col) = (geometry.row_direction(), geometry.column_direction());
    put(
        &mut base,
        tags::IMAGE_ORIENTATION_PATIENT,
        VR::DS,
        ds(&[row[0], row[1], row[2], col[0], col[1], col[2]]),
    );
    put(&mut base, tags::PIXEL_SPACING, VR::DS, ds(&[sy, sx]));
    put(&mut base, tags::SLICE_THICKNESS, VR::DS, ds(&[sz]));
    if attributes.get_tag(tags::SPACING_BETWEEN_SLICES).is_some() {
        put(&mut base, tags::SPACING_BETWEEN_SLICES, VR::DS, ds(&[sz]));
    }

    Ok(SeriesContext {
        base,
        sop_class,
        transfer_syntax: transfer_syntax_of(file_meta),
        implementation_class_uid: file_meta.text(tags::IMPLEMENTATION_CLASS_UID),
        implementation_version_name: file_meta.text(tags::IMPLEMENTATION_VERSION_NAME),
    })
}

fn pixel_bytes(volume: &Volume, k: usize) -> Vec<u8> {
    let plane = volume.data.index_axis(Axis(2), k);
    let ty = volume.sample_type;
    let mut bytes = Vec::with_capacity(plane.len() * ty.bytes());
    // Row-major: columns (i) vary fastest.
    for value in plane.t().iter() {
        let v = *value;
        match ty {
            SampleType::U8 => bytes.push(v as u8),
            SampleType::I8 => bytes.push(v as i8 as u8),
            SampleType::U16 => bytes.extend_from_slice(&(v as u16).to_le_bytes()),
            SampleType::I16 => bytes.extend_from_slice(&(v as i16).to_le_bytes()),
            SampleType::U32 => bytes.extend_from_slice(&(v as u32).to_le_bytes()),
            SampleType::I32 => bytes.extend_from_slice(&(v as i32).to_le_bytes()),
        }
    }
    if bytes.len() % 2 == 1 {
        bytes.push(0);
    }
    bytes
}

fn write_slice(context: &SeriesContext, volume: &Volume, k: usize, dir: &Path) -> Result<PathBuf> {
    let geometry = &volume.geometry;
    let position = geometry.slice_position(k);
    let sop_instance = uid::generate();

    let mut obj = context.base.clone();
    obj.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance.as_str()),
    ));
    obj.put(DataElement::new(
        tags::INSTANCE_NUMBER,
        VR::IS,
        PrimitiveValue::from((k + 1).to_string()),
    ));
    obj.put(DataElement::new(tags::IMAGE_POSITION_PATIENT, VR::DS, ds(&position)));
    obj.put(DataElement::new(
        tags::SLICE_LOCATION,
        VR::DS,
        ds(&[dot(position, geometry.normal())]),
    ));
    let vr = if volume.sample_type.bits() == 8 { VR::OB } else { VR::OW };
    obj.put(DataElement::new(
        tags::PIXEL_DATA,
        vr,
        PrimitiveValue::from(pixel_bytes(volume, k)),
    ));

    let mut builder = FileMetaTableBuilder::new()
        .transfer_syntax(context.transfer_syntax.as_str())
        .media_storage_sop_class_uid(context.sop_class.as_str())
        .media_storage_sop_instance_uid(sop_instance.as_str());
    if let Some(uid) = &context.implementation_class_uid {
        builder = builder.implementation_class_uid(uid.as_str());
    }
    if let Some(name) = &context.implementation_version_name {
        builder = builder.implementation_version_name(name.as_str());
    }
    let meta = builder
        .build()
        .map_err(|e| ToolError::Dicom(e.to_string()))?;

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for element in obj {
        file_obj.put(element);
    }

    let path = dir.join(slice_file_name(k));
    file_obj.write_to_file(&path)?;
    Ok(path)
}

/// Write one file per k-plane into `out_dir`. Files are staged next to the
/// destination and moved into place only when every slice was written.
pub fn write_series(
    volume: &Volume,
    attributes: &AttributeSet,
    file_meta: &AttributeSet,
    out_dir: &Path,
    force: bool,
) -> Result<Vec<PathBuf>> {
    crate::config::ensure_writable(out_dir, force)?;
    let context = series_context(volume, attributes, file_meta)?;

    let parent = match out_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)?;

    let (_, _, nz) = volume.dims();
    let written = (0..nz)
        .into_par_iter()
        .map(|k| write_slice(&context, volume, k, staging.path()))
        .collect::<Result<Vec<_>>>()?;

    if out_dir.is_dir() {
        fs::remove_dir_all(out_dir)?;
    } else if out_dir.exists() {
        fs::remove_file(out_dir)?;
    }
    fs::rename(staging.path(), out_dir)?;

    info!("Wrote {} slice(s) to {:?}", written.len(), out_dir);
    Ok((0..nz).map(|k| out_dir.join(slice_file_name(k))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Attribute, AttributeKey, AttributeValue};
    use crate::geometry::Geometry;
    use dicom::object::open_file;
    use ndarray::Array3;

    fn volume() -> Volume {
        let data = Array3::from_shape_fn((3, 2, 4), |(i, j, k)| (i + 10 * j + 100 * k) as i64 - 50);
        let geometry = Geometry::new(
            [0.5, 0.75, 3.0],
            [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            [-10.0, -20.0, 5.0],
        )
        .unwrap();
        Volume::new(data, SampleType::I16, geometry)
    }

    #[test]
    fn sop_class_follows_modality() {
        assert_eq!(sop_class_for_modality(Some("CT")), CT_IMAGE_STORAGE);
        assert_eq!(sop_class_for_modality(Some("MR")), MR_IMAGE_STORAGE);
        assert_eq!(
            sop_class_for_modality(Some("US")),
            SECONDARY_CAPTURE_IMAGE_STORAGE
        );
        assert_eq!(sop_class_for_modality(None), SECONDARY_CAPTURE_IMAGE_STORAGE);
    }

    #[test]
    fn writes_one_file_per_slice_with_shared_identity() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("series");
        let mut attributes = AttributeSet::new();
        attributes.insert_raw("Modality", "MR").unwrap();
        attributes.insert_raw("InstanceNumber", "99").unwrap();
        attributes.insert(Attribute::new(
            AttributeKey::new(tags::NUMBER_OF_FRAMES),
            VR::IS,
            AttributeValue::Int(4),
        ));

        let files = write_series(&volume(), &attributes, &AttributeSet::new(), &out, false).unwrap();
        assert_eq!(files.len(), 4);
        assert_eq!(files[2], out.join("slice_0002.dcm"));

        let first = open_file(&files[0]).unwrap();
        let last = open_file(&files[3]).unwrap();
        let text = |obj: &dicom::object::DefaultDicomObject, tag| {
            obj.element(tag).unwrap().to_str().unwrap().trim_end_matches('\0').to_string()
        };
        assert_eq!(text(&first, tags::SOP_CLASS_UID), MR_IMAGE_STORAGE);
        assert_eq!(text(&first, tags::SERIES_INSTANCE_UID), text(&last, tags::SERIES_INSTANCE_UID));
        assert_ne!(text(&first, tags::SOP_INSTANCE_UID), text(&last, tags::SOP_INSTANCE_UID));
        assert_eq!(text(&first, tags::PATIENT_ID), "N/A");
        assert_eq!(last.element(tags::INSTANCE_NUMBER).unwrap().to_int::<i32>().unwrap(), 4);
        assert!(first.element(tags::NUMBER_OF_FRAMES).is_err());

        let position = last
            .element(tags::IMAGE_POSITION_PATIENT)
            .unwrap()
            .to_multi_float64()
            .unwrap();
        assert_eq!(position, vec![-10.0, -20.0, 14.0]);
        let spacing = first.element(tags::PIXEL_SPACING).unwrap().to_multi_float64().unwrap();
        assert_eq!(spacing, vec![0.75, 0.5]);
        assert_eq!(first.element(tags::ROWS).unwrap().to_int::<u16>().unwrap(), 2);
        assert_eq!(first.element(tags::COLUMNS).unwrap().to_int::<u16>().unwrap(), 3);

        // No staging directories are left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn existing_output_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("series");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.dcm"), b"old").unwrap();
        let attributes = AttributeSet::new();
        assert!(matches!(
            write_series(&volume(), &attributes, &AttributeSet::new(), &out, false),
            Err(ToolError::OutputExists(_))
        ));
        write_series(&volume(), &attributes, &AttributeSet::new(), &out, true).unwrap();
        assert!(!out.join("stale.dcm").exists());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 4);
    }

    #[test]
    fn pixel_rows_are_row_major() {
        let bytes = pixel_bytes(&volume(), 0);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![-50, -49, -48, -40, -39, -38]);
    }
}
