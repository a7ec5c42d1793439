//
// models.rs
// Dicom-Volume-Tools-rs
//
// Serializable report structures for file summaries, inventory rows and the utility commands.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use serde::Serialize;

/// Fields printed by `info`, also emitted as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct InfoSummary {
    pub filename: String,
    pub storage_type: Option<String>,
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    pub modality: Option<String>,
    pub study_date: Option<String>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub pixel_data_bytes: Option<usize>,
    pub pixel_spacing: Option<Vec<f64>>,
    pub number_of_frames: usize,
    pub slice_location: Option<f64>,
    pub series_description: Option<String>,
    pub transfer_syntax: Option<String>,
}

/// One row of the inventory table; one series per row.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRow {
    pub patient_id: String,
    pub case_id: usize,
    pub date_time: String,
    pub date_time_type: String,
    pub modality: String,
    pub size: String,
    pub spacing: String,
    pub n_frames: usize,
    /// Extra columns, in the order of `extra_columns`.
    pub extra: Vec<String>,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    pub path: String,
}

impl InventoryRow {
    /// Column names; the path always comes last.
    pub fn header(extra_columns: &[String]) -> Vec<String> {
        let mut header: Vec<String> = [
            "patientId",
            "caseId",
            "dateTime",
            "dateTimeType",
            "modality",
            "size",
            "spacing",
            "nFrames",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        header.extend(extra_columns.iter().cloned());
        header.extend(
            ["studyInstanceUID", "seriesInstanceUID", "sopInstanceUID", "path"]
                .iter()
                .map(|s| s.to_string()),
        );
        header
    }

    pub fn record(&self) -> Vec<String> {
        let mut record = vec![
            self.patient_id.clone(),
            self.case_id.to_string(),
            self.date_time.clone(),
            self.date_time_type.clone(),
            self.modality.clone(),
            self.size.clone(),
            self.spacing.clone(),
            self.n_frames.to_string(),
        ];
        record.extend(self.extra.iter().cloned());
        record.extend([
            self.study_instance_uid.clone(),
            self.series_instance_uid.clone(),
            self.sop_instance_uid.clone(),
            self.path.clone(),
        ]);
        record
    }
}

/// Outcome of a batch conversion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub converted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HeaderCopyReport {
    pub written: Vec<PathBuf>,
    pub folders: usize,
    pub no_pixel_data: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyListReport {
    pub copied: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
    pub requested: usize,
}
