//
// config.rs
// Dicom-Volume-Tools-rs
//
// Run-wide settings shared by every command: output directory, overwrite policy and progress display.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use crate::error::{Result, ToolError};

/// Output directory used when `--out-dir` is not given.
pub const DEFAULT_OUT_DIR: &str = "./out";

/// Settings built once from the global CLI flags and passed to each operation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub out_dir: PathBuf,
    pub force: bool,
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            force: false,
            show_progress: false,
        }
    }
}

impl RunConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        RunConfig {
            out_dir: out_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Resolve a relative output name against the output directory.
    pub fn output_path(&self, name: impl AsRef<Path>) -> PathBuf {
        let name = name.as_ref();
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.out_dir.join(name)
        }
    }

    /// Fail with `OutputExists` unless the target is absent or `force` is set.
    pub fn check_target(&self, target: &Path) -> Result<()> {
        ensure_writable(target, self.force)
    }
}

pub(crate) fn ensure_writable(target: &Path, force: bool) -> Result<()> {
    if target.exists() && !force {
        return Err(ToolError::OutputExists(target.to_path_buf()));
    }
    Ok(())
}
