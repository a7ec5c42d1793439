//
// conversion_workflows.rs
// Dicom-Volume-Tools-rs
//
// Integration tests for DICOM to NIfTI conversion, the way back, header stores and reorientation.
//
// Thales Matheus Mendonça Santos - November 2025

mod common;

use std::fs;

use dicom::core::{PrimitiveValue, VR};
use dicom::dictionary_std::tags;
use dicom::object::open_file;
use dicom_volume_tools::attributes::AttributeKey;
use dicom_volume_tools::codec;
use dicom_volume_tools::convert::{self, VolumeFilter, VolumeOptions};
use dicom_volume_tools::dicom_access::ElementAccess;
use dicom_volume_tools::header_store::{HeaderStore, StoreFormat};
use dicom_volume_tools::orientation::{AxisCodes, OrientationTransform};
use dicom_volume_tools::resolver::{parse_pairs, AttributeResolver};
use dicom_volume_tools::series::SeriesLoader;
use dicom_volume_tools::ToolError;
use tempfile::tempdir;

use common::{dicom_files, write_series, write_slice, SyntheticSlice};

#[test]
fn ten_slices_survive_a_round_trip() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    let fixtures = write_series(&series_dir, 10, 6, 5);

    let nifti = dir.path().join("out/series.nii.gz");
    let volume = convert::dicom_to_volume(&series_dir, &nifti, &VolumeOptions::default(), false)
        .expect("dicom to volume");
    assert_eq!(volume.dims(), (5, 6, 10));

    // Slices are ordered by position, not by file name.
    let decoded = codec::read_volume(&nifti).expect("read volume");
    for (k, fixture) in fixtures.iter().enumerate() {
        for ((r, c), value) in fixture.pixels.indexed_iter() {
            assert_eq!(decoded.data[[c, r, k]], *value);
        }
    }
    let geometry = decoded.geometry;
    let spacing = geometry.spacing();
    assert!((spacing[0] - 0.6).abs() < 1e-5);
    assert!((spacing[1] - 0.8).abs() < 1e-5);
    assert!((spacing[2] - 2.5).abs() < 1e-5);
    let origin = geometry.origin();
    assert!((origin[0] + 20.0).abs() < 1e-4 && (origin[1] + 30.0).abs() < 1e-4);

    let back = dir.path().join("back");
    let written = convert::volume_to_dicom(&nifti, &back, &AttributeResolver::new(), None, false)
        .expect("volume to dicom");
    assert_eq!(written.len(), 10);
    assert_eq!(dicom_files(&back).len(), 10);

    let reloaded = SeriesLoader::new(&back).load().expect("reload");
    assert_eq!(reloaded.len(), 10);
    for (slice, fixture) in reloaded.slices().iter().zip(&fixtures) {
        assert_eq!(slice.plane, fixture.pixels);
        let z = slice.position.expect("position")[2];
        assert!((z - fixture.position.expect("fixture position")[2]).abs() < 1e-4);
    }
}

#[test]
fn foreign_file_fails_without_output() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 3, 4, 4);
    fs::write(series_dir.join("notes.txt"), "not an image").expect("write notes");

    let output = dir.path().join("series.nii.gz");
    let err = convert::dicom_to_volume(&series_dir, &output, &VolumeOptions::default(), false)
        .expect_err("foreign file");
    match err {
        ToolError::ForeignFile { path, .. } => assert!(path.ends_with("notes.txt")),
        other => panic!("unexpected error {other}"),
    }
    assert!(!output.exists());
}

#[test]
fn slice_from_another_series_is_foreign() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 4, 4, 4);
    let mut odd = SyntheticSlice::new(4, 4, 9);
    odd.series_uid = "1.2.826.0.1.3680043.8.498.99".to_string();
    write_slice(&series_dir.join("zz_other.dcm"), &odd);

    let err = SeriesLoader::new(&series_dir).load().expect_err("mixed series");
    assert!(matches!(err, ToolError::ForeignFile { ref path, .. } if path.ends_with("zz_other.dcm")));
}

#[test]
fn equal_positions_are_ambiguous() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 3, 4, 4);
    let mut twin = SyntheticSlice::new(4, 4, 1);
    twin.instance_number = 42;
    write_slice(&series_dir.join("twin.dcm"), &twin);

    let err = SeriesLoader::new(&series_dir).load().expect_err("ambiguous");
    assert!(matches!(err, ToolError::AmbiguousOrdering { .. }));
}

#[test]
fn compression_changes_bytes_not_voxels() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 4, 3, 3);

    let packed = dir.path().join("v.nii.gz");
    let plain = dir.path().join("v.nii");
    convert::dicom_to_volume(&series_dir, &packed, &VolumeOptions::default(), false).expect("gz");
    let options = VolumeOptions {
        compress: false,
        ..Default::default()
    };
    convert::dicom_to_volume(&series_dir, &plain, &options, false).expect("nii");

    let packed_bytes = fs::read(&packed).expect("read gz");
    let plain_bytes = fs::read(&plain).expect("read nii");
    assert_ne!(packed_bytes, plain_bytes);
    assert_eq!(&packed_bytes[..2], &[0x1f, 0x8b]);
    assert_eq!(
        codec::decode(&packed_bytes).expect("decode gz").data,
        codec::decode(&plain_bytes).expect("decode nii").data
    );
}

#[test]
fn existing_output_needs_force() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 2, 3, 3);
    let output = dir.path().join("v.nii.gz");
    fs::write(&output, b"keep me").expect("placeholder");

    let err = convert::dicom_to_volume(&series_dir, &output, &VolumeOptions::default(), false)
        .expect_err("exists");
    assert!(matches!(err, ToolError::OutputExists(_)));
    assert_eq!(fs::read(&output).expect("read"), b"keep me");

    convert::dicom_to_volume(&series_dir, &output, &VolumeOptions::default(), true).expect("forced");
    assert!(codec::read_volume(&output).is_ok());
}

#[test]
fn command_line_override_beats_header_store() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 3, 4, 4);
    let nifti = dir.path().join("v.nii.gz");
    convert::dicom_to_volume(&series_dir, &nifti, &VolumeOptions::default(), false).expect("convert");

    let store = HeaderStore::from_str_with(
        "data:\n  Modality: {vr: CS, value: CT}\n  PatientID: {value: STORE01}\n",
        StoreFormat::Yaml,
    )
    .expect("store");
    let overrides = parse_pairs(&[("Modality", "MR")]).expect("overrides");
    let resolver = AttributeResolver::new()
        .with_overrides(overrides)
        .with_store(Some(store));

    let out = dir.path().join("dicom");
    let files = convert::volume_to_dicom(&nifti, &out, &resolver, None, false).expect("to dicom");
    let first = open_file(&files[0]).expect("open");
    assert_eq!(first.element_str(tags::MODALITY).as_deref(), Some("MR"));
    assert_eq!(first.element_str(tags::PATIENT_ID).as_deref(), Some("STORE01"));
    assert_eq!(
        first.element_str(tags::SOP_CLASS_UID).as_deref(),
        Some(common::MR_IMAGE_STORAGE)
    );

    // Every file shares one series identity.
    let series: Vec<Option<String>> = files
        .iter()
        .map(|f| open_file(f).expect("open").element_str(tags::SERIES_INSTANCE_UID))
        .collect();
    assert!(series.iter().all(|s| s.is_some() && *s == series[0]));
}

#[test]
fn keyword_and_tag_with_different_values_conflict() {
    let err = parse_pairs(&[("Modality", "MR"), ("(0008,0060)", "CT")]).expect_err("conflict");
    assert!(matches!(err, ToolError::ConflictingAttribute { .. }));

    let same = parse_pairs(&[("Modality", "MR"), ("0x00080060", "MR")]).expect("collapse");
    assert_eq!(same.len(), 1);
}

#[test]
fn header_only_mode_writes_a_store_and_no_volume() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 3, 4, 4);

    let store_path = dir.path().join("out/attributes.yaml");
    let resolver = AttributeResolver::new()
        .with_overrides(parse_pairs(&[("PatientName", "Anon^Ymous")]).expect("pairs"));
    convert::extract_headers(&series_dir, &store_path, &resolver, false, false).expect("extract");

    let entries: Vec<_> = fs::read_dir(dir.path().join("out"))
        .expect("out dir")
        .map(|e| e.expect("entry").file_name())
        .collect();
    assert_eq!(entries.len(), 1, "only the header store is written");

    let store = HeaderStore::read(&store_path).expect("read store");
    assert_eq!(store.data.text(tags::PATIENT_ID).as_deref(), Some("PAT001"));
    assert_eq!(store.data.text(tags::PATIENT_NAME).as_deref(), Some("Anon^Ymous"));
    assert!(!store.data.contains(AttributeKey::new(tags::PIXEL_DATA)));
    assert!(store.file_meta.contains(AttributeKey::new(tags::TRANSFER_SYNTAX_UID)));

    // The store round-trips through JSON as well.
    let json = store.to_string_with(StoreFormat::Json).expect("json");
    let again = HeaderStore::from_str_with(&json, StoreFormat::Json).expect("parse json");
    assert_eq!(again.data, store.data);
    assert_eq!(again.file_meta, store.file_meta);
}

#[test]
fn reorientation_round_trips_exactly() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 4, 3, 5);

    let original = convert::load_volume(&series_dir, &VolumeOptions::default()).expect("load");
    let target: AxisCodes = "RAS".parse().expect("codes");
    let options = VolumeOptions {
        reorient: Some(target),
        ..Default::default()
    };
    let reoriented = convert::load_volume(&series_dir, &options).expect("reoriented");
    assert_eq!(AxisCodes::of(&reoriented.geometry).expect("codes"), target);

    let transform = OrientationTransform::between(&original.geometry, target).expect("transform");
    let restored = transform.inverse().apply(reoriented).expect("inverse");
    assert_eq!(restored.data, original.data);
    for axis in 0..3 {
        assert!((restored.geometry.origin()[axis] - original.geometry.origin()[axis]).abs() < 1e-9);
    }
}

#[test]
fn malformed_sform_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 2, 3, 3);
    let volume = convert::load_volume(&series_dir, &VolumeOptions::default()).expect("load");

    let mut bytes = codec::encode(&volume, false).expect("encode");
    // srow_x[0]
    bytes[280..284].copy_from_slice(&f32::NAN.to_le_bytes());
    assert!(matches!(codec::decode(&bytes), Err(ToolError::Codec(_))));
}

#[test]
fn reference_file_supplies_defaults() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    let mut fixture = SyntheticSlice::new(3, 3, 0);
    fixture.extra.push((tags::BODY_PART_EXAMINED, VR::CS, PrimitiveValue::from("HEAD")));
    fs::create_dir_all(&series_dir).expect("dir");
    write_slice(&series_dir.join("a.dcm"), &fixture);
    let mut second = SyntheticSlice::new(3, 3, 1);
    second.extra = fixture.extra.clone();
    write_slice(&series_dir.join("b.dcm"), &second);

    let nifti = dir.path().join("v.nii");
    let options = VolumeOptions {
        compress: false,
        ..Default::default()
    };
    convert::dicom_to_volume(&series_dir, &nifti, &options, false).expect("convert");

    let defaults = convert::reference_defaults(&series_dir.join("a.dcm")).expect("reference");
    let out = dir.path().join("dicom");
    let files = convert::volume_to_dicom(&nifti, &out, &AttributeResolver::new(), Some(&defaults), false)
        .expect("to dicom");
    let first = open_file(&files[0]).expect("open");
    assert_eq!(first.element_str(tags::BODY_PART_EXAMINED).as_deref(), Some("HEAD"));
    assert_eq!(first.element_str(tags::STUDY_INSTANCE_UID).as_deref(), Some(common::STUDY_UID));
    assert_ne!(
        first.element_str(tags::SERIES_INSTANCE_UID).as_deref(),
        Some(common::SERIES_UID)
    );
}

#[test]
fn parallel_orientation_vectors_without_reorient_are_not_fatal() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    fs::create_dir_all(&series_dir).expect("dir");
    for k in 0..3 {
        let mut fixture = SyntheticSlice::new(4, 4, k);
        fixture.orientation = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        write_slice(&series_dir.join(format!("s{}.dcm", 3 - k)), &fixture);
    }

    let volume = convert::load_volume(&series_dir, &VolumeOptions::default()).expect("load");
    assert_eq!(volume.dims(), (4, 4, 3));
    // Slices follow InstanceNumber, so the first plane is fixture 0.
    assert_eq!(volume.data[[0, 0, 0]], -500);
    assert_eq!(volume.data[[0, 0, 2]], 1500);

    let options = VolumeOptions {
        reorient: Some("RAS".parse().expect("codes")),
        ..Default::default()
    };
    assert!(matches!(
        convert::load_volume(&series_dir, &options),
        Err(ToolError::Geometry(_))
    ));
}

#[test]
fn oblique_series_survives_the_full_pipeline() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    fs::create_dir_all(&series_dir).expect("dir");
    let (s, c) = (0.5_f64, 0.75_f64.sqrt());
    // Rows tilted 30 degrees about x; the normal is row x column.
    let orientation = [1.0, 0.0, 0.0, 0.0, c, s];
    let normal = [0.0, -s, c];
    let fixtures: Vec<SyntheticSlice> = (0..4)
        .map(|k| {
            let mut fixture = SyntheticSlice::new(3, 5, k);
            let step = 2.5 * k as f64;
            fixture.orientation = orientation;
            fixture.position = Some([
                -20.0 + step * normal[0],
                -30.0 + step * normal[1],
                12.0 + step * normal[2],
            ]);
            fixture
        })
        .collect();
    for (k, fixture) in fixtures.iter().enumerate() {
        write_slice(&series_dir.join(format!("x{}.dcm", 9 - k)), fixture);
    }

    let nifti = dir.path().join("oblique.nii.gz");
    convert::dicom_to_volume(&series_dir, &nifti, &VolumeOptions::default(), false).expect("to volume");
    let back = dir.path().join("back");
    convert::volume_to_dicom(&nifti, &back, &AttributeResolver::new(), None, false).expect("to dicom");

    let reloaded = SeriesLoader::new(&back).load().expect("reload");
    assert_eq!(reloaded.len(), fixtures.len());
    for (slice, fixture) in reloaded.slices().iter().zip(&fixtures) {
        assert_eq!(slice.plane, fixture.pixels);
        let got = slice.orientation.expect("orientation");
        for (a, b) in got.iter().zip(&orientation) {
            assert!((a - b).abs() < 1e-4, "orientation {got:?}");
        }
        let position = slice.position.expect("position");
        let expected = fixture.position.expect("fixture position");
        for axis in 0..3 {
            assert!((position[axis] - expected[axis]).abs() < 1e-3, "position {position:?}");
        }
    }
}

#[test]
fn truncated_or_misplaced_image_data_is_a_codec_error() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 2, 2, 2);
    let volume = convert::load_volume(&series_dir, &VolumeOptions::default()).expect("load");
    let good = codec::encode(&volume, false).expect("encode");

    let truncated = dir.path().join("truncated.nii");
    fs::write(&truncated, &good[..good.len() - 3]).expect("write truncated");
    assert!(matches!(codec::read_volume(&truncated), Err(ToolError::Codec(_))));

    let header_only = dir.path().join("header_only.nii");
    fs::write(&header_only, &good[..100]).expect("write header");
    assert!(matches!(codec::read_volume(&header_only), Err(ToolError::Codec(_))));

    // vox_offset
    for bad in [1.0e30_f32, 4096.0] {
        let mut bytes = good.clone();
        bytes[108..112].copy_from_slice(&bad.to_le_bytes());
        assert!(matches!(codec::decode(&bytes), Err(ToolError::Codec(_))));
    }

    let out = dir.path().join("dicom");
    assert!(convert::volume_to_dicom(&truncated, &out, &AttributeResolver::new(), None, false).is_err());
    assert!(!out.exists());
}

#[test]
fn volume_directory_converts_every_matching_file() {
    let dir = tempdir().expect("tempdir");
    let series_dir = dir.path().join("series");
    write_series(&series_dir, 3, 4, 4);
    let volumes = dir.path().join("volumes");
    let plain = VolumeOptions {
        compress: false,
        ..Default::default()
    };
    for (name, options) in [
        ("a.nii.gz", VolumeOptions::default()),
        ("b.nii.gz", VolumeOptions::default()),
        ("c.nii", plain),
    ] {
        convert::dicom_to_volume(&series_dir, &volumes.join(name), &options, false).expect("volume");
    }
    fs::write(volumes.join("notes.txt"), "skip").expect("notes");

    let out = dir.path().join("dicom");
    let glob = VolumeFilter::glob(VolumeFilter::DEFAULT_PATTERN).expect("glob");
    let report = convert::volumes_to_dicom(&volumes, &out, &glob, &AttributeResolver::new(), None, false)
        .expect("convert directory");
    assert!(report.is_success());
    assert_eq!(report.converted, vec![out.join("a"), out.join("b")]);
    assert_eq!(dicom_files(&out.join("a")).len(), 3);
    assert!(!out.join("c").exists());

    // Existing series are kept; the regex picks up the plain file.
    let regex = VolumeFilter::regex(r"\.nii(\.gz)?$").expect("regex");
    let again = convert::volumes_to_dicom(&volumes, &out, &regex, &AttributeResolver::new(), None, false)
        .expect("second run");
    assert_eq!(again.skipped.len(), 2);
    assert_eq!(again.converted, vec![out.join("c")]);
    assert_eq!(dicom_files(&out.join("c")).len(), 3);
}
