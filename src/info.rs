//
// info.rs
// Dicom-Volume-Tools-rs
//
// Prints a short summary of a DICOM file (or the first file of a series directory) and optionally the full dataset.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fmt::Write;
use std::path::{Path, PathBuf};

use dicom::core::dictionary::DataDictionary;
use dicom::core::value::Value;
use dicom::core::{PrimitiveValue, Tag};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{open_file, DefaultDicomObject, InMemDicomObject};
use dicom_dictionary_std::tags;

use crate::batch::is_dicom_file;
use crate::dicom_access::ElementAccess;
use crate::error::{Result, ToolError};
use crate::models::InfoSummary;

const NOT_AVAILABLE: &str = "N/A";
const MAX_VALUE_LEN: usize = 64;

fn dicom_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_dicom_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// The file to describe: `path` itself, or the first `*.dcm` of a directory.
pub fn resolve_input(path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        return dicom_files_in(path)?
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::EmptySeries(path.to_path_buf()));
    }
    if !path.exists() {
        return Err(ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file or folder does not exist: {:?}", path),
        )));
    }
    Ok(path.to_path_buf())
}

fn pixel_data_len(obj: &InMemDicomObject) -> Option<usize> {
    let element = obj.element(tags::PIXEL_DATA).ok()?;
    match element.value() {
        Value::Primitive(p) => Some(p.calculate_byte_len()),
        Value::PixelSequence(seq) => Some(seq.fragments().iter().map(|f| f.len()).sum()),
        Value::Sequence(_) => None,
    }
}

pub fn summarize(path: &Path, obj: &DefaultDicomObject) -> Result<InfoSummary> {
    let number_of_frames = match obj.element_int(tags::NUMBER_OF_FRAMES) {
        Some(n) => usize::try_from(n).unwrap_or(1),
        None => {
            let dir = path.parent().unwrap_or(Path::new("."));
            dicom_files_in(dir)?.len().max(1)
        }
    };
    let dims = |tag: Tag| obj.element_int(tag).and_then(|v| u32::try_from(v).ok());

    Ok(InfoSummary {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        storage_type: obj.element_str(tags::SOP_CLASS_UID),
        patient_name: obj.element_str(tags::PATIENT_NAME),
        patient_id: obj.element_str(tags::PATIENT_ID),
        modality: obj.element_str(tags::MODALITY),
        study_date: obj.element_str(tags::STUDY_DATE),
        rows: dims(tags::ROWS),
        columns: dims(tags::COLUMNS),
        pixel_data_bytes: pixel_data_len(obj),
        pixel_spacing: obj.element_f64s(tags::PIXEL_SPACING),
        number_of_frames,
        slice_location: obj.element_f64(tags::SLICE_LOCATION),
        series_description: obj.element_str(tags::SERIES_DESCRIPTION),
        transfer_syntax: obj.transfer_syntax(),
    })
}

fn or_na(value: Option<&str>) -> &str {
    value.unwrap_or(NOT_AVAILABLE)
}

/// Summary block as printed by `info`.
pub fn render(summary: &InfoSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Filename.........: {}", summary.filename);
    let _ = writeln!(out, "Storage type.....: {}", or_na(summary.storage_type.as_deref()));
    let _ = writeln!(out);
    let _ = writeln!(out, "Patient's name...: {}", or_na(summary.patient_name.as_deref()));
    let _ = writeln!(out, "Patient id.......: {}", or_na(summary.patient_id.as_deref()));
    let _ = writeln!(out, "Modality.........: {}", or_na(summary.modality.as_deref()));
    let _ = writeln!(out, "Study date.......: {}", or_na(summary.study_date.as_deref()));
    if let (Some(rows), Some(cols), Some(bytes)) = (summary.rows, summary.columns, summary.pixel_data_bytes) {
        let _ = writeln!(out, "Image size.......: {rows} x {cols}, {bytes} bytes");
        if let Some(spacing) = &summary.pixel_spacing {
            let values: Vec<String> = spacing.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "Pixel spacing....: [{}]", values.join(", "));
        }
    }
    let _ = writeln!(out, "Number of frames.: {}", summary.number_of_frames);
    let location = summary
        .slice_location
        .map(|v| v.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let _ = writeln!(out, "Slice location...: {location}");
    let _ = writeln!(
        out,
        "Series descr.....: {}",
        or_na(summary.series_description.as_deref())
    );
    out
}

/// Every element of the dataset, one per line, sequences indented.
pub fn dump_dataset(obj: &InMemDicomObject) -> String {
    let mut out = String::new();
    dump_object(obj, 0, &mut out);
    out
}

fn dump_object(obj: &InMemDicomObject, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for elem in obj.iter() {
        let tag = elem.header().tag;
        let vr = elem.header().vr;
        let name = tag_name(tag);
        match elem.value() {
            Value::Primitive(p) => {
                let _ = writeln!(out, "{indent}{} {name} {vr} {}", format_tag(tag), preview(p));
            }
            Value::Sequence(seq) => {
                let _ = writeln!(
                    out,
                    "{indent}{} {name} {vr} [sequence: {} item(s)]",
                    format_tag(tag),
                    seq.items().len()
                );
                for (idx, item) in seq.items().iter().enumerate() {
                    let _ = writeln!(out, "{indent}  Item {}", idx + 1);
                    dump_object(item, depth + 2, out);
                }
            }
            Value::PixelSequence(p) => {
                let _ = writeln!(
                    out,
                    "{indent}{} {name} {vr} [encapsulated: {} fragment(s)]",
                    format_tag(tag),
                    p.fragments().len()
                );
            }
        }
    }
}

fn preview(value: &PrimitiveValue) -> String {
    if matches!(value, PrimitiveValue::U8(_) | PrimitiveValue::U16(_)) && value.multiplicity() > 16 {
        return format!("{} bytes", value.calculate_byte_len());
    }
    let text = value.to_str();
    if text.chars().count() <= MAX_VALUE_LEN {
        text.into_owned()
    } else {
        let mut truncated: String = text.chars().take(MAX_VALUE_LEN).collect();
        truncated.push('…');
        truncated
    }
}

fn format_tag(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

fn tag_name(tag: Tag) -> &'static str {
    StandardDataDictionary
        .by_tag(tag)
        .map(|e| e.alias)
        .unwrap_or("UnknownTag")
}

/// Print the summary of `path` to stdout, as text or JSON.
pub fn print_info(path: &Path, all: bool, json: bool) -> Result<()> {
    let file = resolve_input(path)?;
    let obj = open_file(&file)?;
    let summary = summarize(&file, &obj)?;

    if json {
        let text = serde_json::to_string_pretty(&summary).map_err(|e| ToolError::Io(e.into()))?;
        println!("{text}");
        return Ok(());
    }
    if all {
        println!("Entire DICOM dataset:");
        print!("{}", dump_dataset(&obj));
        println!();
    }
    print!("{}", render(&summary));
    Ok(())
}
