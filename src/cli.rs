//
// cli.rs
// Dicom-Volume-Tools-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use regex::Regex;
use tracing::info;

use crate::attributes::AttributeSet;
use crate::config::{RunConfig, DEFAULT_OUT_DIR};
use crate::convert::{self, VolumeFilter, VolumeOptions};
use crate::copy_list::{self, CopyListOptions};
use crate::header_store::HeaderStore;
use crate::headers::{self, HeaderCopyOptions};
use crate::inventory::{self, InventoryOptions};
use crate::orientation::AxisCodes;
use crate::resolver::{parse_pairs, AttributeResolver};
use crate::stack::{self, StackOptions};
use crate::{batch, info, logging};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "dicom-volume-tools", version)]
#[command(about = "Convert DICOM series to NIfTI volumes and back, plus DICOM housekeeping tools", long_about = None)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Directory for outputs that are not given an explicit path
    #[arg(long, default_value = DEFAULT_OUT_DIR, global = true)]
    pub out_dir: PathBuf,
    /// Replace existing outputs
    #[arg(short, long, global = true)]
    pub force: bool,
    /// Hide progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,
    #[command(subcommand)]
    pub command: Commands,
}

/// Attribute overrides shared by the commands that write DICOM.
#[derive(Args, Debug, Default)]
pub struct AttributeArgs {
    /// Set an attribute (keyword or tag), e.g. --attribute Modality MR
    #[arg(long = "attribute", num_args = 2, value_names = ["KEY", "VALUE"], action = ArgAction::Append)]
    pub attribute: Vec<String>,
    /// Set a file meta attribute, e.g. --meta-attribute TransferSyntaxUID 1.2.840.10008.1.2
    #[arg(long = "meta-attribute", num_args = 2, value_names = ["KEY", "VALUE"], action = ArgAction::Append)]
    pub meta_attribute: Vec<String>,
    /// Header store (.yaml, .yml or .json) with attributes to apply
    #[arg(long)]
    pub attribute_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a DICOM series directory into a NIfTI volume
    ToVolume {
        input: PathBuf,
        /// Output file (default: <out-dir>/<input name>.nii.gz)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write plain .nii instead of .nii.gz
        #[arg(long)]
        no_compression: bool,
        /// Reorient to the given axis codes (LAS when no value is given)
        #[arg(long, num_args = 0..=1, default_missing_value = "LAS")]
        reorient: Option<AxisCodes>,
        /// Collect slices from subdirectories too
        #[arg(long)]
        recursive: bool,
        /// Convert every series directory below the input
        #[arg(long, conflicts_with_all = ["output", "create_attribute_file"])]
        batch: bool,
        /// Only extract the series header into this header store file
        #[arg(long, value_name = "PATH")]
        create_attribute_file: Option<PathBuf>,
        #[command(flatten)]
        attributes: AttributeArgs,
    },
    /// Convert a NIfTI volume, or every matching volume of a directory, into DICOM series
    ToDicom {
        input: PathBuf,
        /// Output directory (default: <out-dir>/<input name>; for a directory input,
        /// the root holding one series directory per volume, default <out-dir>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Glob on file names when the input is a directory (default: *.nii.gz)
        #[arg(short, long)]
        pattern: Option<String>,
        /// Regular expression on file names when the input is a directory
        #[arg(long, conflicts_with = "pattern")]
        regex: Option<String>,
        /// DICOM file whose attributes serve as defaults
        #[arg(long)]
        reference: Option<PathBuf>,
        #[command(flatten)]
        attributes: AttributeArgs,
    },
    /// Convert a directory of 2D images into a DICOM series
    StackToDicom {
        input: PathBuf,
        /// Output directory (default: <out-dir>/<input name>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Regular expression on file names (default: common image extensions)
        #[arg(long)]
        regex: Option<String>,
        /// Use at most this many images
        #[arg(long)]
        n_files: Option<usize>,
        #[command(flatten)]
        attributes: AttributeArgs,
    },
    /// Write a sample header store
    AttributeTemplate {
        /// Target file (default: <out-dir>/attributes.yaml)
        path: Option<PathBuf>,
    },
    /// Copy DICOM files without their pixel data
    CopyHeaders {
        input: PathBuf,
        /// Copy every file instead of the first one per folder
        #[arg(long)]
        all: bool,
        /// Also copy files that carry no pixel data
        #[arg(long)]
        keep_empty: bool,
    },
    /// Copy the files or folders listed in a CSV file
    CopyFromList {
        input: PathBuf,
        list_file: PathBuf,
        /// Column holding the entries (the list then has a header row)
        #[arg(long)]
        column: Option<String>,
        /// Copy entries directly into the output directory
        #[arg(long)]
        flat: bool,
        /// Warn about missing entries instead of failing
        #[arg(long)]
        skip_missing: bool,
    },
    /// Summarize all series below a directory into dicom_summary.csv
    Inventory {
        input: PathBuf,
        /// Additional attribute column (repeatable)
        #[arg(long = "extra-tag", action = ArgAction::Append)]
        extra_tags: Vec<String>,
        /// Only the first N series
        #[arg(long)]
        n_max: Option<usize>,
    },
    /// Print information about a DICOM file or series directory
    Info {
        path: PathBuf,
        /// Also print the whole dataset
        #[arg(long)]
        all: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn pairs(flat: &[String]) -> Vec<(&str, &str)> {
    flat.chunks_exact(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
        .collect()
}

impl AttributeArgs {
    fn is_empty(&self) -> bool {
        self.attribute.is_empty() && self.meta_attribute.is_empty() && self.attribute_file.is_none()
    }

    fn resolver(&self) -> anyhow::Result<AttributeResolver> {
        let overrides = parse_pairs(&pairs(&self.attribute)).context("Invalid --attribute")?;
        let meta = parse_pairs(&pairs(&self.meta_attribute)).context("Invalid --meta-attribute")?;
        let store = match &self.attribute_file {
            Some(path) => Some(
                HeaderStore::read(path)
                    .with_context(|| format!("Failed to read attribute file {:?}", path))?,
            ),
            None => None,
        };
        Ok(AttributeResolver::new()
            .with_overrides(overrides)
            .with_meta_overrides(meta)
            .with_store(store))
    }
}

fn default_output(config: &RunConfig, input: &Path) -> PathBuf {
    config.output_path(convert::input_stem(input))
}

pub fn run() -> anyhow::Result<()> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = RunConfig::new(&cli.out_dir)
        .with_force(cli.force)
        .with_progress(!cli.no_progress);
    dispatch(cli.command, &config)
}

pub fn dispatch(command: Commands, config: &RunConfig) -> anyhow::Result<()> {
    match command {
        Commands::ToVolume {
            input,
            output,
            no_compression,
            reorient,
            recursive,
            batch: batch_mode,
            create_attribute_file,
            attributes,
        } => {
            // A NIfTI volume carries no DICOM attributes to apply them to.
            if create_attribute_file.is_none() && !attributes.is_empty() {
                bail!("--attribute, --meta-attribute and --attribute-file require --create-attribute-file for to-volume");
            }
            let options = VolumeOptions {
                compress: !no_compression,
                reorient,
                recursive,
            };
            if let Some(store_path) = create_attribute_file {
                let resolver = attributes.resolver()?;
                convert::extract_headers(&input, &store_path, &resolver, recursive, config.force)
                    .with_context(|| format!("Failed to extract the header of {:?}", input))?;
            } else if batch_mode {
                let report = batch::convert_all(&input, config, &options)
                    .with_context(|| format!("Batch conversion of {:?} failed", input))?;
                if !report.is_success() {
                    for (dir, reason) in &report.failed {
                        eprintln!("{}: {}", dir.display(), reason);
                    }
                    bail!(
                        "{} of {} series failed to convert",
                        report.failed.len(),
                        report.failed.len() + report.converted.len() + report.skipped.len()
                    );
                }
            } else {
                let target = match output {
                    Some(path) => convert::with_volume_extension(&path, options.compress),
                    None => config.output_path(convert::volume_file_name(
                        &convert::input_stem(&input),
                        options.compress,
                    )),
                };
                convert::dicom_to_volume(&input, &target, &options, config.force)
                    .with_context(|| format!("Failed to convert {:?}", input))?;
            }
        }
        Commands::ToDicom {
            input,
            output,
            pattern,
            regex,
            reference,
            attributes,
        } => {
            let resolver = attributes.resolver()?;
            let defaults = match &reference {
                Some(path) => Some(
                    convert::reference_defaults(path)
                        .with_context(|| format!("Failed to read reference {:?}", path))?,
                ),
                None => None,
            };
            if input.is_dir() {
                let filter = match (&regex, &pattern) {
                    (Some(re), _) => VolumeFilter::regex(re)?,
                    (None, Some(glob)) => VolumeFilter::glob(glob)?,
                    (None, None) => VolumeFilter::glob(VolumeFilter::DEFAULT_PATTERN)?,
                };
                let out_root = output.unwrap_or_else(|| config.out_dir.clone());
                let report = convert::volumes_to_dicom(
                    &input,
                    &out_root,
                    &filter,
                    &resolver,
                    defaults.as_ref(),
                    config.force,
                )
                .with_context(|| format!("Failed to convert volumes in {:?}", input))?;
                if !report.is_success() {
                    for (file, reason) in &report.failed {
                        eprintln!("{}: {}", file.display(), reason);
                    }
                    bail!("{} volume(s) failed to convert", report.failed.len());
                }
            } else {
                if pattern.is_some() || regex.is_some() {
                    bail!("--pattern and --regex need a directory input");
                }
                let out_dir = output.unwrap_or_else(|| default_output(config, &input));
                convert::volume_to_dicom(&input, &out_dir, &resolver, defaults.as_ref(), config.force)
                    .with_context(|| format!("Failed to convert {:?}", input))?;
            }
        }
        Commands::StackToDicom {
            input,
            output,
            regex,
            n_files,
            attributes,
        } => {
            let regex = match regex {
                Some(pattern) => Some(
                    Regex::new(&pattern).with_context(|| format!("Invalid regex {pattern:?}"))?,
                ),
                None => None,
            };
            let options = StackOptions {
                regex,
                max_files: n_files,
                show_progress: config.show_progress,
            };
            let resolver = attributes.resolver()?;
            let data = resolver.resolve(&AttributeSet::new());
            let file_meta = resolver.resolve_file_meta(&AttributeSet::new());
            let out_dir = output.unwrap_or_else(|| default_output(config, &input));
            stack::stack_to_dicom(&input, &out_dir, &data, &file_meta, &options, config.force)
                .with_context(|| format!("Failed to convert images in {:?}", input))?;
        }
        Commands::AttributeTemplate { path } => {
            let path = path.unwrap_or_else(|| config.output_path("attributes.yaml"));
            HeaderStore::template()
                .write(&path, config.force)
                .with_context(|| format!("Failed to write {:?}", path))?;
            info!("Attribute template written to {:?}", path);
        }
        Commands::CopyHeaders {
            input,
            all,
            keep_empty,
        } => {
            let options = HeaderCopyOptions {
                all_files: all,
                keep_empty,
                force: config.force,
                show_progress: config.show_progress,
            };
            headers::copy_headers(&input, &config.out_dir, &options)
                .with_context(|| format!("Failed to copy headers from {:?}", input))?;
        }
        Commands::CopyFromList {
            input,
            list_file,
            column,
            flat,
            skip_missing,
        } => {
            let options = CopyListOptions {
                column,
                flat,
                skip_missing,
                show_progress: config.show_progress,
            };
            copy_list::copy_from_list(&input, &config.out_dir, &list_file, &options)
                .with_context(|| format!("Failed to copy entries of {:?}", list_file))?;
        }
        Commands::Inventory {
            input,
            extra_tags,
            n_max,
        } => {
            let options = InventoryOptions {
                extra_tags,
                max_series: n_max,
                show_progress: config.show_progress,
            };
            inventory::write_inventory(&input, &config.out_dir, &options, config.force)
                .with_context(|| format!("Failed to build the inventory of {:?}", input))?;
        }
        Commands::Info { path, all, json } => {
            info::print_info(&path, all, json)
                .with_context(|| format!("Failed to read {:?}", path))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_and_attribute_pairs() {
        let cli = Cli::try_parse_from([
            "dicom-volume-tools",
            "-vv",
            "--force",
            "to-dicom",
            "brain.nii.gz",
            "--attribute",
            "Modality",
            "MR",
            "--attribute",
            "(0010,0010)",
            "Doe^John",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.force);
        assert_eq!(cli.out_dir, PathBuf::from(DEFAULT_OUT_DIR));
        match cli.command {
            Commands::ToDicom { attributes, .. } => {
                assert_eq!(
                    pairs(&attributes.attribute),
                    vec![("Modality", "MR"), ("(0010,0010)", "Doe^John")]
                );
                let resolved = attributes.resolver().unwrap().resolve(&AttributeSet::new());
                assert_eq!(resolved.len(), 2);
            }
            _ => panic!("expected to-dicom"),
        }
    }

    #[test]
    fn to_volume_rejects_attributes_without_a_header_store() {
        let dir = tempfile::tempdir().unwrap();
        let series = dir.path().join("series");
        let cli = Cli::try_parse_from([
            "dicom-volume-tools",
            "to-volume",
            series.to_str().unwrap(),
            "--attribute",
            "Modality",
            "MR",
        ])
        .unwrap();
        let config = RunConfig::new(dir.path().join("out"));
        let err = dispatch(cli.command, &config).unwrap_err();
        assert!(err.to_string().contains("--create-attribute-file"));
        assert!(!dir.path().join("out").exists());

        let batch = Cli::try_parse_from([
            "dicom-volume-tools",
            "to-volume",
            "series",
            "--batch",
            "--attribute-file",
            "attrs.yaml",
        ])
        .unwrap();
        assert!(dispatch(batch.command, &config).is_err());
    }

    #[test]
    fn to_dicom_pattern_and_regex_conflict() {
        assert!(Cli::try_parse_from([
            "dicom-volume-tools",
            "to-dicom",
            "volumes",
            "--pattern",
            "*.nii",
            "--regex",
            "nii$",
        ])
        .is_err());
    }

    #[test]
    fn reorient_defaults_to_las() {
        let cli = Cli::try_parse_from(["dicom-volume-tools", "to-volume", "series", "--reorient"]).unwrap();
        match cli.command {
            Commands::ToVolume { reorient, .. } => {
                assert_eq!(reorient.map(|r| r.to_string()).as_deref(), Some("LAS"))
            }
            _ => panic!("expected to-volume"),
        }
        assert!(Cli::try_parse_from(["dicom-volume-tools", "to-volume", "s", "--reorient", "XYZ"]).is_err());
    }
}
