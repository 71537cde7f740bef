use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::plan::{DeletionPlan, SectionId};

/// Everything one run of the pipeline needs.
///
/// The structure is independent of how it gets populated; the command-line
/// binary is one way to fill it in.
///
/// # Example
///
/// ```rust
/// use exifcheck::config::{Config, PrintSelection};
/// use exifcheck::plan::DeletionPlan;
///
/// let config = Config {
///     print: PrintSelection { exif: true, ..Default::default() },
///     output: Some("clean.jpg".into()),
///     plan: DeletionPlan::parse("3").unwrap(),
///     ..Config::new("photo.jpg")
/// };
/// assert!(config.wants_deletions());
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// The file to load.
    pub input: PathBuf,
    /// Options handed to the metadata store when loading and persisting.
    pub control: Control,
    /// Which sections to format.
    pub print: PrintSelection,
    /// Where formatted sections go. Console when `None`.
    pub print_to: Option<PathBuf>,
    /// Print one line per thumbnail found.
    pub show_thumbnails: bool,
    /// Extraction destinations.
    pub extract: Extraction,
    /// Where the (possibly modified) metadata is written.
    pub output: Option<PathBuf>,
    /// Sections and fields to delete before persisting.
    pub plan: DeletionPlan,
}

impl Config {
    /// A configuration that only loads `input` and does nothing else.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            control: Control::default(),
            print: PrintSelection::default(),
            print_to: None,
            show_thumbnails: false,
            extract: Extraction::default(),
            output: None,
            plan: DeletionPlan::default(),
        }
    }

    pub fn wants_deletions(&self) -> bool {
        !self.plan.is_empty()
    }
}

/// Options passed through to the metadata store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Control {
    /// What to do with fields the store does not know.
    pub unknown: UnknownPolicy,
    /// Report tolerated decoding anomalies as warnings.
    pub warn: bool,
    /// Trace every structure read while decoding.
    pub parse_debug: bool,
    /// Trace the layout written while encoding.
    pub serialize_debug: bool,
}

/// Policy for fields missing from the store's tag tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// Keep unknown fields as they are.
    #[default]
    Keep,
    /// Drop unknown fields when writing the output.
    Remove,
    /// Fail as soon as an unknown field is found.
    Stop,
}

impl FromStr for UnknownPolicy {
    type Err = Error;

    /// Only the first letter counts, in either case: `k`, `r` or `s`.
    fn from_str(s: &str) -> Result<Self> {
        match s.chars().next() {
            Some('k' | 'K') => Ok(UnknownPolicy::Keep),
            Some('r' | 'R') => Ok(UnknownPolicy::Remove),
            Some('s' | 'S') => Ok(UnknownPolicy::Stop),
            _ => Err(Error::Argument(format!(
                "unknown action for unknown fields: \"{s}\" (expected keep, remove or stop)"
            ))),
        }
    }
}

/// Which groups of sections to format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrintSelection {
    /// Primary and thumbnail sections.
    pub tiff: bool,
    /// EXIF, GPS and interoperability sections.
    pub exif: bool,
    /// Maker notes and the maker's embedded preview.
    pub maker: bool,
}

impl PrintSelection {
    /// Everything.
    pub fn all() -> Self {
        Self {
            tiff: true,
            exif: true,
            maker: true,
        }
    }

    pub fn any(&self) -> bool {
        self.tiff || self.exif || self.maker
    }

    /// The sections to format, in print order.
    pub fn sections(&self) -> Vec<SectionId> {
        let mut sections = Vec::with_capacity(7);
        if self.tiff {
            sections.extend([SectionId::PRIMARY, SectionId::THUMBNAIL]);
        }
        if self.exif {
            sections.extend([SectionId::EXIF, SectionId::GPS, SectionId::INTEROP]);
        }
        if self.maker {
            sections.extend([SectionId::MAKER, SectionId::EMBEDDED]);
        }
        sections
    }
}

/// Destinations for extracted data. `None` skips the extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
    /// The metadata block exactly as found in the input.
    pub original: Option<PathBuf>,
    /// The thumbnail referenced by the thumbnail section.
    pub thumbnail: Option<PathBuf>,
    /// The thumbnail (preview) held in the maker notes.
    pub maker_thumbnail: Option<PathBuf>,
}

/// Treat an empty path the same as no path.
pub fn non_empty(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Display helper for optional destinations in log lines.
pub fn describe(path: Option<&Path>) -> String {
    path.map_or_else(|| "console".to_string(), |p| p.display().to_string())
}
