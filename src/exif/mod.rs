//! EXIF metadata store backed by a small TIFF codec.
//!
//! - [`ExifLoader`] reads a file and decodes its EXIF block into an [`ExifStore`]
//! - [`ExifStore`] implements [`MetadataStore`](crate::pipeline::MetadataStore):
//!   thumbnails, formatting, extraction, field and section removal, persisting
//!
//! JPEG, PNG and WebP containers are handled with `img-parts`; a file that is
//! a bare TIFF block (such as one written by original-metadata extraction) is
//! read and written as is.
//!
//! Sections decoded: primary (IFD0), thumbnail (IFD1), EXIF, GPS and
//! interoperability. Maker notes stay an undecoded field of the EXIF section,
//! exposed as the `maker` section. Vendor previews (`embedded`) are not
//! decoded. Persisting relocates every value, so maker notes that use absolute
//! offsets may no longer resolve in the output.

mod container;
mod format;
mod ifd;
mod store;
mod tags;

pub use store::{ExifLoader, ExifStore};
pub use tags::tag_name;
