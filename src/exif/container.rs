use img_parts::jpeg::{Jpeg, JpegSegment, markers};
use img_parts::{Bytes, DynImage, ImageEXIF};

use crate::error::{Error, Result};

// JPEG APP1 payload prefix, also kept by some WebP writers in the EXIF chunk
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

/// How the metadata block is held in the input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// JPEG, PNG or WebP, handled with img-parts.
    Image,
    /// The file is the TIFF block itself.
    Bare,
}

/// Whether `bytes` starts with a TIFF header.
pub fn is_tiff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II\x2a\x00") || bytes.starts_with(b"MM\x00\x2a")
}

/// Find the TIFF metadata block in a file's contents.
pub fn extract(file: &Bytes) -> Result<(Container, Bytes)> {
    if is_tiff(file) {
        return Ok((Container::Bare, file.clone()));
    }

    let image = parse(file)?;
    let exif = image.exif().ok_or(Error::NoMetadata)?;
    let exif = if exif.starts_with(EXIF_PREFIX) {
        exif.slice(EXIF_PREFIX.len()..)
    } else {
        exif
    };
    if exif.is_empty() {
        return Err(Error::NoMetadata);
    }
    Ok((Container::Image, exif))
}

/// Put a new TIFF block back into the original file's contents.
pub fn embed(container: Container, file: &Bytes, tiff: Vec<u8>) -> Result<Bytes> {
    match container {
        Container::Bare => Ok(Bytes::from(tiff)),
        Container::Image => {
            let image = match parse(file)? {
                DynImage::Jpeg(mut jpeg) => {
                    replace_jpeg_exif(&mut jpeg, &tiff);
                    DynImage::Jpeg(jpeg)
                }
                mut image => {
                    image.set_exif(Some(Bytes::from(tiff)));
                    image
                }
            };
            Ok(image.encoder().bytes())
        }
    }
}

/// Put the EXIF APP1 segment back where the old one was, or right after APP0.
///
/// `Jpeg::set_exif` always inserts at segment index 3, which lands after the
/// quantization tables on most files and panics on files with fewer segments.
fn replace_jpeg_exif(jpeg: &mut Jpeg, tiff: &[u8]) {
    let original_pos = find_exif_segment_pos(jpeg);
    let segments = jpeg.segments_mut();
    segments.retain(|s| !is_exif_segment(s));

    let after_app0 = segments.first().is_some_and(|s| s.marker() == markers::APP0);
    let target = original_pos
        .unwrap_or(usize::from(after_app0))
        .min(segments.len());

    let mut contents = Vec::with_capacity(EXIF_PREFIX.len() + tiff.len());
    contents.extend_from_slice(EXIF_PREFIX);
    contents.extend_from_slice(tiff);
    segments.insert(
        target,
        JpegSegment::new_with_contents(markers::APP1, Bytes::from(contents)),
    );
}

/// Position of the EXIF APP1 segment in a JPEG.
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    jpeg.segments().iter().position(is_exif_segment)
}

fn is_exif_segment(segment: &JpegSegment) -> bool {
    segment.marker() == markers::APP1 && segment.contents().starts_with(EXIF_PREFIX)
}

fn parse(file: &Bytes) -> Result<DynImage> {
    DynImage::from_bytes(file.clone())
        .map_err(|e| Error::Malformed(format!("cannot parse image container: {e}")))?
        .ok_or_else(|| Error::Unsupported("not a JPEG, PNG, WebP or TIFF file".into()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use img_parts::png::Png;

    const TIFF: &[u8] = b"MM\x00\x2a\x00\x00\x00\x08\x00\x00\x00\x00\x00\x00";

    /// SOI, APP0, APP1 (EXIF), DQT, SOF0, DHT, SOS with entropy data, EOI.
    pub(crate) fn jpeg_with_exif(tiff: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, markers::SOI];
        let mut segment = |marker: u8, contents: &[u8]| {
            out.extend_from_slice(&[0xFF, marker]);
            out.extend_from_slice(&((contents.len() + 2) as u16).to_be_bytes());
            out.extend_from_slice(contents);
        };
        segment(markers::APP0, b"JFIF\0\x01\x01\x00\x00\x01\x00\x01\x00\x00");
        segment(markers::APP1, &[EXIF_PREFIX, tiff].concat());
        segment(markers::DQT, &[0x00; 4]);
        segment(markers::SOF0, &[0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00]);
        segment(0xC4, &[0x00, 0x00]);
        segment(markers::SOS, &[0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        out.extend_from_slice(&[0x12, 0x34, 0xFF, markers::EOI]);
        out
    }

    /// A 1x1 greyscale PNG carrying `tiff` in an eXIf chunk.
    pub(crate) fn png_with_exif(tiff: &[u8]) -> Vec<u8> {
        let mut base = b"\x89PNG\r\n\x1a\n".to_vec();
        base.extend_from_slice(b"\x00\x00\x00\x0dIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x00\x00\x00\x00\x3a\x7e\x9b\x55");
        base.extend_from_slice(b"\x00\x00\x00\x00IEND\xae\x42\x60\x82");
        let mut png = Png::from_bytes(Bytes::from(base)).unwrap();
        png.set_exif(Some(Bytes::copy_from_slice(tiff)));
        png.encoder().bytes().to_vec()
    }

    pub(crate) fn segment_markers(file: &[u8]) -> Vec<u8> {
        Jpeg::from_bytes(Bytes::copy_from_slice(file))
            .unwrap()
            .segments()
            .iter()
            .map(|s| s.marker())
            .collect()
    }

    // ── extract ──────────────────────────────────────────────────────

    #[test]
    fn bare_blocks_are_taken_as_is() {
        let file = Bytes::from_static(b"MM\x00\x2a\x00\x00\x00\x08\x00\x00\x00\x00\x00\x00");
        let (container, tiff) = extract(&file).unwrap();
        assert_eq!(container, Container::Bare);
        assert_eq!(tiff, file);

        let out = embed(container, &file, b"II\x2a\x00".to_vec()).unwrap();
        assert_eq!(&out[..], b"II\x2a\x00");
    }

    #[test]
    fn jpeg_block_without_prefix() {
        let file = Bytes::from(jpeg_with_exif(TIFF));
        let (container, tiff) = extract(&file).unwrap();
        assert_eq!(container, Container::Image);
        assert_eq!(&tiff[..], TIFF);
    }

    #[test]
    fn png_block() {
        let file = Bytes::from(png_with_exif(TIFF));
        let (container, tiff) = extract(&file).unwrap();
        assert_eq!(container, Container::Image);
        assert_eq!(&tiff[..], TIFF);
    }

    #[test]
    fn image_without_exif() {
        let mut png = Png::from_bytes(Bytes::from(png_with_exif(TIFF))).unwrap();
        png.set_exif(None);
        let file = png.encoder().bytes();
        assert!(matches!(extract(&file), Err(Error::NoMetadata)));
    }

    #[test]
    fn unknown_files_are_unsupported() {
        let file = Bytes::from_static(b"hello, this is not an image");
        assert!(matches!(extract(&file), Err(Error::Unsupported(_))));
    }

    // ── embed ────────────────────────────────────────────────────────

    #[test]
    fn jpeg_exif_segment_keeps_its_place() {
        let file = Bytes::from(jpeg_with_exif(TIFF));
        let before = segment_markers(&file);
        assert_eq!(before, vec![0xE0, 0xE1, 0xDB, 0xC0, 0xC4, 0xDA]);

        let replacement = b"II\x2a\x00\x08\x00\x00\x00\x00\x00\x00\x00\x00\x00".to_vec();
        let out = embed(Container::Image, &file, replacement.clone()).unwrap();
        assert_eq!(segment_markers(&out), before);
        assert_eq!(&extract(&out).unwrap().1[..], &replacement[..]);
        // entropy data and EOI are carried over
        assert!(out.ends_with(&[0x12, 0x34, 0xFF, 0xD9]));
    }

    #[test]
    fn short_jpeg_does_not_panic() {
        let mut file = vec![0xFF, markers::SOI, 0xFF, markers::APP1];
        file.extend_from_slice(&((EXIF_PREFIX.len() + TIFF.len() + 2) as u16).to_be_bytes());
        file.extend_from_slice(EXIF_PREFIX);
        file.extend_from_slice(TIFF);
        file.extend_from_slice(&[0xFF, markers::EOI]);

        let out = embed(Container::Image, &Bytes::from(file), TIFF.to_vec()).unwrap();
        assert_eq!(&out[..4], &[0xFF, markers::SOI, 0xFF, markers::APP1]);
    }

    #[test]
    fn png_round_trip() {
        let file = Bytes::from(png_with_exif(TIFF));
        let replacement = b"II\x2a\x00\x08\x00\x00\x00\x00\x00\x00\x00\x00\x00".to_vec();
        let out = embed(Container::Image, &file, replacement.clone()).unwrap();
        assert!(out.starts_with(b"\x89PNG"));
        assert_eq!(&extract(&out).unwrap().1[..], &replacement[..]);
    }

    // ── helpers ──────────────────────────────────────────────────────

    #[test]
    fn tiff_signatures() {
        assert!(is_tiff(b"II\x2a\x00\x08\x00\x00\x00"));
        assert!(is_tiff(b"MM\x00\x2a\x00\x00\x00\x08"));
        assert!(!is_tiff(b"\xff\xd8\xff\xe1"));
        assert!(!is_tiff(b"II"));
    }
}
