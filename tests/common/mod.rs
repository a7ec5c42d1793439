//
// mod.rs
// Dicom-Volume-Tools-rs
//
// Builders for small synthetic DICOM series shared by the integration tests.
//
// Thales Matheus Mendonça Santos - November 2025

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, StandardDataDictionary};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use ndarray::Array2;

pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
pub const SERIES_UID: &str = "1.2.826.0.1.3680043.8.498.1";
pub const STUDY_UID: &str = "1.2.826.0.1.3680043.8.498.2";

/// One synthetic 16-bit signed slice.
#[derive(Debug, Clone)]
pub struct SyntheticSlice {
    pub rows: usize,
    pub cols: usize,
    pub position: Option<[f64; 3]>,
    pub orientation: [f64; 6],
    pub instance_number: i64,
    pub series_uid: String,
    pub patient_id: String,
    pub modality: String,
    pub extra: Vec<(Tag, VR, PrimitiveValue)>,
    /// `[row, col]` stored values.
    pub pixels: Array2<i64>,
}

impl SyntheticSlice {
    pub fn new(rows: usize, cols: usize, k: usize) -> Self {
        let pixels = Array2::from_shape_fn((rows, cols), |(r, c)| {
            (k as i64) * 1000 + (r as i64) * 10 + c as i64 - 500
        });
        SyntheticSlice {
            rows,
            cols,
            position: Some([-20.0, -30.0, 2.5 * k as f64]),
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            instance_number: k as i64 + 1,
            series_uid: SERIES_UID.to_string(),
            patient_id: "PAT001".to_string(),
            modality: "MR".to_string(),
            extra: Vec::new(),
            pixels,
        }
    }
}

fn ds(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
}

pub fn write_slice(path: &Path, fixture: &SyntheticSlice) {
    let sop_instance = format!("{}.{}", fixture.series_uid, fixture.instance_number + 100);
    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    let mut put = |tag: Tag, vr: VR, value: PrimitiveValue| {
        obj.put(DataElement::new(tag, vr, value));
    };

    put(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(MR_IMAGE_STORAGE));
    put(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance.as_str()));
    put(tags::STUDY_DATE, VR::DA, PrimitiveValue::from("20240105"));
    put(tags::STUDY_TIME, VR::TM, PrimitiveValue::from("093000"));
    put(tags::MODALITY, VR::CS, PrimitiveValue::from(fixture.modality.as_str()));
    put(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Test^Patient"));
    put(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(fixture.patient_id.as_str()));
    put(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from("Axial T1"));
    put(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(STUDY_UID));
    put(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(fixture.series_uid.as_str()));
    put(
        tags::INSTANCE_NUMBER,
        VR::IS,
        PrimitiveValue::from(fixture.instance_number.to_string()),
    );
    if let Some(position) = fixture.position {
        put(tags::IMAGE_POSITION_PATIENT, VR::DS, ds(&position));
        put(tags::IMAGE_ORIENTATION_PATIENT, VR::DS, ds(&fixture.orientation));
    }
    put(tags::PIXEL_SPACING, VR::DS, ds(&[0.8, 0.6]));
    put(tags::SLICE_THICKNESS, VR::DS, ds(&[2.5]));
    put(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16));
    put(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2"));
    put(tags::ROWS, VR::US, PrimitiveValue::from(fixture.rows as u16));
    put(tags::COLUMNS, VR::US, PrimitiveValue::from(fixture.cols as u16));
    put(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16));
    put(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16));
    put(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16));
    put(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16));
    for (tag, vr, value) in &fixture.extra {
        put(*tag, *vr, value.clone());
    }

    let bytes: Vec<u8> = fixture
        .pixels
        .iter()
        .flat_map(|v| (*v as i16).to_le_bytes())
        .collect();
    put(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes));

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid(MR_IMAGE_STORAGE)
        .media_storage_sop_instance_uid(sop_instance.as_str())
        .build()
        .expect("meta");
    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for element in obj {
        file_obj.put(element);
    }
    file_obj.write_to_file(path).expect("write test dicom");
}

/// Write `n` slices into `dir` under names that do not follow slice order.
/// Returns the fixtures in anatomical order.
pub fn write_series(dir: &Path, n: usize, rows: usize, cols: usize) -> Vec<SyntheticSlice> {
    std::fs::create_dir_all(dir).expect("series dir");
    let fixtures: Vec<SyntheticSlice> = (0..n).map(|k| SyntheticSlice::new(rows, cols, k)).collect();
    for (k, fixture) in fixtures.iter().enumerate() {
        // Reverse-sorted names: file order is the opposite of position order.
        let name = format!("img_{:03}.dcm", (n - k) * 7 % 1000);
        write_slice(&dir.join(name), fixture);
    }
    fixtures
}

pub fn dicom_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|e| e.expect("entry").path())
        .filter(|p| p.extension().map_or(false, |e| e == "dcm"))
        .collect();
    files.sort();
    files
}
