use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::ThumbnailKind;
use crate::plan::{FieldId, SectionId};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the library can report.
///
/// Each variant renders as a single human-readable line. The pipeline wraps
/// failures in [`Error::Stage`] so the message names the operation that
/// failed; [`Error::exit_code`] looks through those wrappers.
///
/// # Error Categories
///
/// - [`Error::Argument`] - bad command-line arguments or configuration values
/// - [`Error::Parse`] - malformed removal specification
/// - [`Error::Io`], [`Error::Malformed`], [`Error::NoMetadata`], [`Error::Unsupported`] -
///   loading or writing files
/// - [`Error::UnknownField`] - unknown field met while the policy is `stop`
/// - [`Error::SectionRemoval`], [`Error::StructuralField`], [`Error::MissingThumbnail`] -
///   the store refused a request
/// - [`Error::Internal`] - unrecoverable fault inside the metadata store
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Argument(String),

    #[error("invalid removal specification \"{spec}\": bad token \"{token}\" (expected a decimal or 0x-prefixed hexadecimal integer)")]
    Parse { spec: String, token: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata: {0}")]
    Malformed(String),

    #[error("no EXIF metadata found")]
    NoMetadata,

    #[error("unsupported file format: {0}")]
    Unsupported(String),

    #[error("unknown field {field} in {section} section")]
    UnknownField { section: SectionId, field: FieldId },

    #[error("cannot remove {section} section: {reason}")]
    SectionRemoval { section: SectionId, reason: String },

    #[error("cannot remove field {field} from {section} section: it locates the {target} section, remove that section instead")]
    StructuralField {
        section: SectionId,
        field: FieldId,
        target: SectionId,
    },

    #[error("no {0} thumbnail available")]
    MissingThumbnail(ThumbnailKind),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap this error with the name of the operation it interrupted.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Error::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Process exit code for this error: 2 for internal faults, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Internal(_) => 2,
            Error::Stage { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}
