//! # exifcheck
//!
//! Check image files for EXIF metadata, print selected metadata sections,
//! extract the original metadata block and thumbnails, and selectively delete
//! whole sections or single fields before writing a new file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exifcheck::config::{Config, PrintSelection};
//! use exifcheck::exif::ExifLoader;
//! use exifcheck::pipeline::run;
//! use exifcheck::plan::DeletionPlan;
//!
//! fn main() -> exifcheck::Result<()> {
//!     let config = Config {
//!         print: PrintSelection { tiff: true, ..Default::default() },
//!         // drop Software and DateTime from IFD0, and the whole GPS section
//!         plan: DeletionPlan::parse("0:0x131:0x132,3")?,
//!         output: Some("clean.jpg".into()),
//!         ..Config::new("photo.jpg")
//!     };
//!
//!     let report = run(&config, &ExifLoader, &mut std::io::stdout())?;
//!     println!("{} field(s) removed", report.removed_fields);
//!     Ok(())
//! }
//! ```
//!
//! ## Removal specifications
//!
//! `section[:field]*[,section[:field]*]*`, numbers in decimal or `0x` hex.
//! A section without fields is removed whole, which makes field removals for
//! the same section redundant; those are dropped from the plan.
//!
//! | Section | Id |
//! |---------|----|
//! | primary (IFD0) | 0 |
//! | thumbnail (IFD1) | 1 |
//! | exif | 2 |
//! | gps | 3 |
//! | interoperability | 4 |
//! | maker notes | 5 |
//! | maker preview | 6 |
//!
//! ## Modules
//!
//! - [`plan`]: section/field identifiers, removal specification parser, deletion plans
//! - [`config`]: pipeline configuration
//! - [`pipeline`]: metadata store traits and the fixed-order operation pipeline
//! - [`exif`]: the EXIF metadata store (JPEG, PNG, WebP, bare TIFF)

pub mod config;
pub mod error;
pub mod exif;
pub mod pipeline;
pub mod plan;

pub use error::{Error, Result};
