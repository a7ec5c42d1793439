//
// inventory.rs
// Dicom-Volume-Tools-rs
//
// Builds a CSV summary with one row per DICOM series found below a directory.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use dicom::core::Tag;
use dicom::object::open_file;
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::attributes::AttributeKey;
use crate::dicom_access::ElementAccess;
use crate::error::{Result, ToolError};
use crate::headers::find_dicom_files;
use crate::models::InventoryRow;
use crate::progress;

pub const SUMMARY_FILE: &str = "dicom_summary.csv";
const NOT_AVAILABLE: &str = "N/A";

/// Columns appended to every inventory after the user's own.
pub const DEFAULT_EXTRA_TAGS: &[&str] = &[
    "RadiationSetting",
    "PositionerMotion",
    "BodyPartExamined",
    "StudyDescription",
    "SeriesDescription",
];

/// Date/time pairs tried in order; the first complete pair wins.
const DATE_TIME_SOURCES: &[(Tag, Tag, &str)] = &[
    (tags::ACQUISITION_DATE, tags::ACQUISITION_TIME, "AcquisitionDateTime"),
    (tags::STUDY_DATE, tags::STUDY_TIME, "StudyDateTime"),
    (
        tags::INSTANCE_CREATION_DATE,
        tags::INSTANCE_CREATION_TIME,
        "InstanceCreationDateTime",
    ),
    (tags::SERIES_DATE, tags::SERIES_TIME, "SeriesDateTime"),
];

#[derive(Debug, Clone, Default)]
pub struct InventoryOptions {
    /// Additional attribute keywords or tags, one column each.
    pub extra_tags: Vec<String>,
    /// Only the first n series (in path order).
    pub max_series: Option<usize>,
    pub show_progress: bool,
}

/// A DICOM DA + TM pair; fractional seconds and short times (HH, HHMM) are accepted.
pub fn parse_date_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y%m%d").ok()?;
    let time = time.trim();
    let (whole, fraction) = match time.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (time, None),
    };
    if whole.is_empty() || whole.len() > 6 || whole.len() % 2 != 0 {
        return None;
    }
    let padded = format!("{whole:0<6}");
    let mut parsed = NaiveTime::parse_from_str(&padded, "%H%M%S").ok()?;
    if let Some(fraction) = fraction.filter(|f| !f.is_empty()) {
        let digits: String = fraction.chars().take(9).collect();
        let nanos: u32 = format!("{digits:0<9}").parse().ok()?;
        parsed = parsed.with_nanosecond(nanos)?;
    }
    Some(date.and_time(parsed))
}

fn epoch() -> NaiveDateTime {
    DateTime::from_timestamp(0, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

fn clean(text: &str) -> String {
    text.replace('"', "").replace(['\n', ';'], "_")
}

/// Column name for a keyword: first letter in lower case.
fn column_name(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn list_repr<T: std::fmt::Display>(values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Series folders below `dir`, each with its files in name order.
fn group_by_folder(dir: &Path) -> Result<BTreeMap<PathBuf, Vec<PathBuf>>> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for file in find_dicom_files(dir)? {
        let parent = file.parent().unwrap_or(dir).to_path_buf();
        groups.entry(parent).or_default().push(file);
    }
    Ok(groups)
}

struct Summary {
    row: InventoryRow,
    when: NaiveDateTime,
}

/// Summary of the first readable file of a folder; `None` when no file opens.
fn summarize(folder: &Path, files: &[PathBuf], extra: &[(String, AttributeKey)]) -> Option<Summary> {
    let sid = folder.display().to_string();
    let opened = files.iter().find_map(|file| match open_file(file) {
        Ok(obj) => Some(obj),
        Err(e) => {
            warn!("Skipping unreadable file {:?}: {}", file, e);
            None
        }
    });
    let Some(obj) = opened else {
        warn!("No readable DICOM file in {}; series left out", sid);
        return None;
    };
    let text = |tag: Tag| obj.element_str(tag).map(|s| clean(&s));
    let required = |tag: Tag, name: &str| {
        text(tag).unwrap_or_else(|| {
            warn!("Dataset has no tag '{}': {}", name, sid);
            NOT_AVAILABLE.to_string()
        })
    };

    let (when, kind) = DATE_TIME_SOURCES
        .iter()
        .find_map(|(date, time, kind)| {
            let value = parse_date_time(&obj.element_str(*date)?, &obj.element_str(*time)?)?;
            Some((value, kind.to_string()))
        })
        .unwrap_or_else(|| {
            warn!("No date tag for dataset: {}", sid);
            (epoch(), NOT_AVAILABLE.to_string())
        });

    let size = match (obj.element_int(tags::COLUMNS), obj.element_int(tags::ROWS)) {
        (Some(cols), Some(rows)) => list_repr(&[cols, rows]),
        _ => NOT_AVAILABLE.to_string(),
    };
    let spacing = obj
        .element_f64s(tags::PIXEL_SPACING)
        .map(|v| list_repr(&v))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let n_frames = obj
        .element_int(tags::NUMBER_OF_FRAMES)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(files.len());

    let row = InventoryRow {
        patient_id: text(tags::PATIENT_ID).unwrap_or_default(),
        case_id: 0,
        date_time: when.format("%Y-%m-%d %H:%M:%S").to_string(),
        date_time_type: kind,
        modality: required(tags::MODALITY, "Modality"),
        size,
        spacing,
        n_frames,
        extra: extra
            .iter()
            .map(|(_, key)| text(key.tag()).unwrap_or_else(|| NOT_AVAILABLE.to_string()))
            .collect(),
        study_instance_uid: required(tags::STUDY_INSTANCE_UID, "StudyInstanceUID"),
        series_instance_uid: required(tags::SERIES_INSTANCE_UID, "SeriesInstanceUID"),
        sop_instance_uid: required(tags::SOP_INSTANCE_UID, "SOPInstanceUID"),
        path: sid,
    };
    Some(Summary { row, when })
}

/// Extra columns: user tags first, then the defaults; duplicates dropped.
fn extra_columns(user_tags: &[String]) -> Result<Vec<(String, AttributeKey)>> {
    let mut columns: Vec<(String, AttributeKey)> = Vec::new();
    let requested = user_tags
        .iter()
        .map(String::as_str)
        .chain(DEFAULT_EXTRA_TAGS.iter().copied());
    for name in requested {
        let key = AttributeKey::parse(name)?;
        if columns.iter().any(|(_, k)| *k == key) {
            continue;
        }
        let label = key.keyword().unwrap_or(name);
        columns.push((column_name(label), key));
    }
    Ok(columns)
}

/// Summarize every series folder below `dir`, sorted by patient and date-time.
pub fn collect(dir: &Path, options: &InventoryOptions) -> Result<(Vec<String>, Vec<InventoryRow>)> {
    let extra = extra_columns(&options.extra_tags)?;
    let mut groups: Vec<(PathBuf, Vec<PathBuf>)> = group_by_folder(dir)?.into_iter().collect();
    if let Some(max) = options.max_series.filter(|m| *m > 0) {
        groups.truncate(max);
    }
    info!("Collecting data of {} series below {:?}", groups.len(), dir);

    let pb = progress::bar(groups.len() as u64, options.show_progress, "Collecting");
    let mut summaries: Vec<Summary> = groups
        .par_iter()
        .filter_map(|(folder, files)| {
            let summary = summarize(folder, files, &extra);
            pb.inc(1);
            summary
        })
        .collect();
    pb.finish_and_clear();

    summaries.sort_by(|a, b| {
        a.row
            .patient_id
            .cmp(&b.row.patient_id)
            .then(a.when.cmp(&b.when))
    });
    let mut rows: Vec<InventoryRow> = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let mut row = summary.row;
        row.case_id = match rows.last() {
            Some(prev) if prev.patient_id == row.patient_id => prev.case_id + 1,
            _ => 1,
        };
        rows.push(row);
    }

    let names: Vec<String> = extra.into_iter().map(|(name, _)| name).collect();
    Ok((InventoryRow::header(&names), rows))
}

/// Write the inventory of `dir` to `<out_dir>/dicom_summary.csv`.
pub fn write_inventory(dir: &Path, out_dir: &Path, options: &InventoryOptions, force: bool) -> Result<PathBuf> {
    let target = out_dir.join(SUMMARY_FILE);
    crate::config::ensure_writable(&target, force)?;
    let (header, rows) = collect(dir, options)?;

    std::fs::create_dir_all(out_dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(out_dir)?;
    {
        let mut writer = csv::Writer::from_writer(&mut tmp);
        writer.write_record(&header)?;
        for row in &rows {
            writer.write_record(row.record())?;
        }
        writer.flush()?;
    }
    tmp.flush()?;
    tmp.persist(&target).map_err(|e| ToolError::Io(e.error))?;
    info!("Inventory of {} series written to {:?}", rows.len(), target);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dicom_date_times() {
        let dt = parse_date_time("20240131", "101530.25").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2024-01-31 10:15:30.250");
        assert_eq!(
            parse_date_time("20240131", "1015").unwrap().format("%H:%M:%S").to_string(),
            "10:15:00"
        );
        assert!(parse_date_time("2024-01-31", "101530").is_none());
        assert!(parse_date_time("20240131", "1").is_none());
    }

    #[test]
    fn extra_columns_follow_user_order_then_defaults() {
        let columns = extra_columns(&["PatientAge".to_string(), "SeriesDescription".to_string()]).unwrap();
        let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "patientAge",
                "seriesDescription",
                "radiationSetting",
                "positionerMotion",
                "bodyPartExamined",
                "studyDescription",
            ]
        );
        assert!(extra_columns(&["NoSuchTag".to_string()]).is_err());
    }

    #[test]
    fn cleans_separators() {
        assert_eq!(clean("a;b\n\"c\""), "a_b_c");
        assert_eq!(list_repr(&[512, 256]), "[512, 256]");
    }
}
