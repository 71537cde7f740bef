use img_parts::Bytes;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use super::container::{self, Container};
use super::format;
use super::ifd::{self, Tiff};
use super::tags::{self, TAG_COMPRESSION, TAG_MAKER_NOTE};
use crate::config::Control;
use crate::error::{Error, Result};
use crate::pipeline::{MetadataSource, MetadataStore, ThumbnailInfo, ThumbnailKind};
use crate::plan::{FieldId, SectionId};

/// Loads [`ExifStore`]s from JPEG, PNG, WebP or bare TIFF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifLoader;

impl MetadataSource for ExifLoader {
    type Store = ExifStore;

    fn load(&self, path: &Path, control: &Control) -> Result<ExifStore> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        ExifStore::from_bytes(Bytes::from(bytes), *control)
    }
}

/// EXIF metadata decoded from one file.
///
/// Keeps the file contents and the metadata block as loaded, so the original
/// block can be extracted and the container rebuilt after changes.
#[derive(Debug, Clone)]
pub struct ExifStore {
    file: Bytes,
    container: Container,
    original: Bytes,
    tiff: Tiff,
    control: Control,
    /// Sections that went away together with the EXIF section.
    cascaded: BTreeSet<SectionId>,
}

impl ExifStore {
    pub fn from_bytes(file: Bytes, control: Control) -> Result<Self> {
        let (container, original) = container::extract(&file)?;
        let tiff = Tiff::decode(&original, &control)?;
        log::debug!(
            "Decoded {} bytes of metadata: {} section(s), thumbnail: {}",
            original.len(),
            tiff.sections.len(),
            tiff.thumbnail.as_ref().map_or(0, |t| t.len())
        );
        Ok(Self {
            file,
            container,
            original,
            tiff,
            control,
            cascaded: BTreeSet::new(),
        })
    }

    /// Sections present, including maker notes when the EXIF section holds them.
    pub fn sections(&self) -> Vec<SectionId> {
        let mut sections: Vec<SectionId> = self.tiff.sections.keys().copied().collect();
        if self.maker_note().is_some() {
            sections.push(SectionId::MAKER);
        }
        sections
    }

    fn maker_note(&self) -> Option<&ifd::Entry> {
        self.tiff.sections.get(&SectionId::EXIF)?.get(TAG_MAKER_NOTE)
    }

    fn write_file(path: &Path, bytes: &[u8]) -> Result<usize> {
        let mut file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(|e| Error::io(path, e))?;
        Ok(bytes.len())
    }
}

impl MetadataStore for ExifStore {
    fn thumbnails(&self) -> Vec<ThumbnailInfo> {
        let Some(ref data) = self.tiff.thumbnail else {
            return Vec::new();
        };
        let compression = self
            .tiff
            .sections
            .get(&SectionId::THUMBNAIL)
            .and_then(|ifd| ifd.get(TAG_COMPRESSION))
            .and_then(|e| e.first_u32(self.tiff.order));
        vec![ThumbnailInfo {
            origin: SectionId::THUMBNAIL,
            compression: tags::compression_name(compression),
            size: data.len(),
        }]
    }

    fn format_sections(&self, out: &mut dyn Write, sections: &[SectionId]) -> Result<()> {
        let io_err = |e: std::io::Error| Error::io("<formatted output>", e);
        for &section in sections {
            if section == SectionId::MAKER {
                if let Some(note) = self.maker_note() {
                    format::write_maker_note(out, note).map_err(io_err)?;
                }
                continue;
            }
            match self.tiff.sections.get(&section) {
                Some(ifd) => {
                    format::write_section(out, section, ifd, self.tiff.order).map_err(io_err)?
                }
                None => log::debug!("No {section} section to format"),
            }
        }
        Ok(())
    }

    fn write_original(&self, path: &Path) -> Result<usize> {
        Self::write_file(path, &self.original)
    }

    fn write_thumbnail(&self, path: &Path, kind: ThumbnailKind) -> Result<usize> {
        match (kind, &self.tiff.thumbnail) {
            (ThumbnailKind::Exif, Some(data)) => Self::write_file(path, data),
            // maker previews are vendor specific and not decoded
            _ => Err(Error::MissingThumbnail(kind)),
        }
    }

    fn remove_field(&mut self, section: SectionId, field: FieldId) -> Result<()> {
        if let Some(target) = ifd::structural_target(section, field.0) {
            return Err(Error::StructuralField {
                section,
                field,
                target,
            });
        }
        let fields = match section {
            SectionId::MAKER => {
                return Err(Error::SectionRemoval {
                    section,
                    reason: "maker notes are not decoded, remove the whole section instead".into(),
                });
            }
            _ => self.tiff.sections.get_mut(&section),
        };
        let Some(fields) = fields else {
            return Err(Error::SectionRemoval {
                section,
                reason: format!("section is not present (while removing field {field})"),
            });
        };
        if !fields.remove(field.0) {
            log::warn!("Field {field} not present in {section} section, nothing to remove");
        }
        Ok(())
    }

    fn remove_section(&mut self, section: SectionId) -> Result<()> {
        let not_present = || Error::SectionRemoval {
            section,
            reason: "section is not present".into(),
        };
        if self.cascaded.remove(&section) {
            log::debug!("{section} section already removed along with EXIF");
            return Ok(());
        }
        match section {
            SectionId::PRIMARY => Err(Error::SectionRemoval {
                section,
                reason: "the primary section is mandatory".into(),
            }),
            SectionId::MAKER => {
                let removed = self
                    .tiff
                    .sections
                    .get_mut(&SectionId::EXIF)
                    .is_some_and(|ifd| ifd.remove(TAG_MAKER_NOTE));
                if removed { Ok(()) } else { Err(not_present()) }
            }
            _ => {
                let removed = self.tiff.sections.remove(&section).ok_or_else(not_present)?;
                match section {
                    SectionId::THUMBNAIL => self.tiff.thumbnail = None,
                    SectionId::EXIF => {
                        if removed.get(TAG_MAKER_NOTE).is_some() {
                            self.cascaded.insert(SectionId::MAKER);
                        }
                        if self.tiff.sections.remove(&SectionId::INTEROP).is_some() {
                            log::debug!("Interoperability section removed along with EXIF");
                            self.cascaded.insert(SectionId::INTEROP);
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    fn persist(&self, path: &Path) -> Result<usize> {
        if self.maker_note().is_some() {
            log::debug!("Maker notes are relocated, offsets inside them may no longer be valid");
        }
        let tiff = self.tiff.encode(&self.control);
        let bytes = container::embed(self.container, &self.file, tiff)?;
        Self::write_file(path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UnknownPolicy};
    use crate::exif::container::tests::{jpeg_with_exif, png_with_exif, segment_markers};
    use crate::exif::ifd::tests::{ascii, sample};
    use crate::exif::ifd::ByteOrder;
    use crate::pipeline::run;
    use crate::plan::DeletionPlan;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sample_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("sample.exif");
        fs::write(&path, sample(ByteOrder::Little).encode(&Control::default())).unwrap();
        path
    }

    fn load(path: &Path) -> ExifStore {
        ExifLoader.load(path, &Control::default()).unwrap()
    }

    // ── loading ──────────────────────────────────────────────────────

    #[test]
    fn loads_bare_block() {
        let dir = TempDir::new().unwrap();
        let store = load(&sample_file(&dir));
        assert_eq!(
            store.sections(),
            vec![
                SectionId::PRIMARY,
                SectionId::THUMBNAIL,
                SectionId::EXIF,
                SectionId::GPS,
                SectionId::INTEROP,
                SectionId::MAKER,
            ]
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = ExifLoader
            .load(&dir.path().join("nope.jpg"), &Control::default())
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn stop_policy_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vendor.exif");
        let mut tiff = sample(ByteOrder::Big);
        if let Some(ifd) = tiff.sections.get_mut(&SectionId::PRIMARY) {
            ifd.entries.push(ascii(0xC000, "vendor"));
        }
        fs::write(&path, tiff.encode(&Control::default())).unwrap();

        let stop = Control {
            unknown: UnknownPolicy::Stop,
            ..Control::default()
        };
        let err = ExifLoader.load(&path, &stop).unwrap_err();
        assert_eq!(err.to_string(), "unknown field 0xc000 in primary section");
    }

    // ── inspection and extraction ────────────────────────────────────

    #[test]
    fn thumbnail_descriptor() {
        let dir = TempDir::new().unwrap();
        let store = load(&sample_file(&dir));
        let thumbs = store.thumbnails();
        assert_eq!(thumbs.len(), 1);
        assert_eq!(thumbs[0].to_string(), "thumbnail type JPEG size 9");
    }

    #[test]
    fn extracts_original_and_thumbnail() {
        let dir = TempDir::new().unwrap();
        let input = sample_file(&dir);
        let store = load(&input);

        let original = dir.path().join("original.bin");
        store.write_original(&original).unwrap();
        assert_eq!(fs::read(&original).unwrap(), fs::read(&input).unwrap());

        let thumb = dir.path().join("thumb.jpg");
        let written = store.write_thumbnail(&thumb, ThumbnailKind::Exif).unwrap();
        assert_eq!(written, 9);
        assert_eq!(&fs::read(&thumb).unwrap()[..2], &[0xFF, 0xD8]);

        let err = store
            .write_thumbnail(&dir.path().join("preview.jpg"), ThumbnailKind::Maker)
            .unwrap_err();
        assert_eq!(err.to_string(), "no maker thumbnail available");
    }

    #[test]
    fn formats_present_sections_only() {
        let dir = TempDir::new().unwrap();
        let store = load(&sample_file(&dir));
        let mut out = Vec::new();
        store
            .format_sections(&mut out, &[SectionId::PRIMARY, SectionId::MAKER, SectionId::EMBEDDED])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Primary image (IFD0) (5 fields)\n"));
        assert!(text.contains("\"Canon EOS 5D\""));
        assert!(text.contains("Maker notes (6 bytes, not decoded)"));
        assert!(text.contains("01 02 03 04 05 06"));
        assert!(!text.contains("Maker preview"));
    }

    // ── removal ──────────────────────────────────────────────────────

    #[test]
    fn remove_fields_and_sections() {
        let dir = TempDir::new().unwrap();
        let mut store = load(&sample_file(&dir));

        store.remove_field(SectionId::PRIMARY, FieldId(0x0131)).unwrap();
        // absent field is a no-op
        store.remove_field(SectionId::PRIMARY, FieldId(0x0131)).unwrap();
        store.remove_section(SectionId::GPS).unwrap();
        store.remove_section(SectionId::THUMBNAIL).unwrap();

        assert!(store.thumbnails().is_empty());
        assert!(!store.sections().contains(&SectionId::GPS));
        assert!(store.tiff.sections[&SectionId::PRIMARY].get(0x0131).is_none());
    }

    #[test]
    fn removing_absent_section_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = load(&sample_file(&dir));
        store.remove_section(SectionId::GPS).unwrap();

        let err = store.remove_section(SectionId::GPS).unwrap_err();
        assert_eq!(err.to_string(), "cannot remove gps section: section is not present");
        assert!(store.remove_section(SectionId::EMBEDDED).is_err());
        assert!(store.remove_section(SectionId(42)).is_err());
        assert!(store.remove_field(SectionId::GPS, FieldId(1)).is_err());
    }

    #[test]
    fn primary_cannot_be_removed() {
        let dir = TempDir::new().unwrap();
        let mut store = load(&sample_file(&dir));
        let err = store.remove_section(SectionId::PRIMARY).unwrap_err();
        assert!(err.to_string().contains("mandatory"));
    }

    #[test]
    fn exif_removal_takes_interop_and_maker() {
        let dir = TempDir::new().unwrap();
        let mut store = load(&sample_file(&dir));
        store.remove_section(SectionId::EXIF).unwrap();
        let sections = store.sections();
        assert!(!sections.contains(&SectionId::INTEROP));
        assert!(!sections.contains(&SectionId::MAKER));

        // both existed at load time, so naming them as well is fine
        store.remove_section(SectionId::INTEROP).unwrap();
        store.remove_section(SectionId::MAKER).unwrap();
        assert!(store.remove_section(SectionId::MAKER).is_err());
    }

    #[test]
    fn plans_naming_exif_and_its_dependents() {
        let dir = TempDir::new().unwrap();
        let input = sample_file(&dir);
        for spec in ["2,4", "2,5", "2,4,5"] {
            let output = dir.path().join(format!("clean-{}.exif", spec.replace(',', "-")));
            let config = Config {
                output: Some(output.clone()),
                plan: DeletionPlan::parse(spec).unwrap(),
                ..Config::new(&input)
            };
            let report = run(&config, &ExifLoader, &mut Vec::new()).unwrap();
            assert_eq!(report.removed_sections.len(), spec.split(',').count());
            assert_eq!(
                load(&output).sections(),
                vec![SectionId::PRIMARY, SectionId::THUMBNAIL, SectionId::GPS]
            );
        }
    }

    #[test]
    fn structural_fields_are_refused() {
        let dir = TempDir::new().unwrap();
        let mut store = load(&sample_file(&dir));

        let err = store.remove_field(SectionId::PRIMARY, FieldId(0x8769)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot remove field 0x8769 from primary section: it locates the exif section, remove that section instead"
        );
        assert!(matches!(
            store.remove_field(SectionId::THUMBNAIL, FieldId(0x0201)),
            Err(Error::StructuralField { target: SectionId::THUMBNAIL, .. })
        ));
        assert!(matches!(
            store.remove_field(SectionId::EXIF, FieldId(0xA005)),
            Err(Error::StructuralField { target: SectionId::INTEROP, .. })
        ));
        assert_eq!(store.sections().len(), 6);
        assert_eq!(store.thumbnails().len(), 1);
    }

    #[test]
    fn maker_section_is_the_maker_note() {
        let dir = TempDir::new().unwrap();
        let mut store = load(&sample_file(&dir));
        assert!(store.remove_field(SectionId::MAKER, FieldId(1)).is_err());
        store.remove_section(SectionId::MAKER).unwrap();
        assert!(store.sections().contains(&SectionId::EXIF));
        assert!(!store.sections().contains(&SectionId::MAKER));
    }

    // ── persist ──────────────────────────────────────────────────────

    #[test]
    fn persisted_changes_survive_reload() {
        let dir = TempDir::new().unwrap();
        let input = sample_file(&dir);
        let output = dir.path().join("out.exif");

        let mut store = load(&input);
        store.remove_field(SectionId::EXIF, FieldId(0x829A)).unwrap();
        store.remove_section(SectionId::GPS).unwrap();
        store.persist(&output).unwrap();

        let reloaded = load(&output);
        assert!(!reloaded.sections().contains(&SectionId::GPS));
        assert!(reloaded.tiff.sections[&SectionId::EXIF].get(0x829A).is_none());
        assert!(reloaded.tiff.sections[&SectionId::EXIF].get(0x9003).is_some());
        assert_eq!(reloaded.thumbnails(), store.thumbnails());

        // the input is untouched
        assert_eq!(load(&input).sections().len(), 6);
    }

    #[test]
    fn full_pipeline_on_real_store() {
        let dir = TempDir::new().unwrap();
        let input = sample_file(&dir);
        let config = Config {
            show_thumbnails: true,
            print_to: Some(dir.path().join("listing.txt")),
            print: crate::config::PrintSelection::all(),
            output: Some(dir.path().join("clean.exif")),
            plan: DeletionPlan::parse("0:0x131:0x132,3,3:1,1").unwrap(),
            ..Config::new(&input)
        };
        let mut console = Vec::new();
        let report = run(&config, &ExifLoader, &mut console).unwrap();

        assert_eq!(String::from_utf8(console).unwrap(), "thumbnail type JPEG size 9\n");
        assert_eq!(report.removed_fields, 2);
        assert_eq!(report.removed_sections, vec![SectionId::THUMBNAIL, SectionId::GPS]);

        let listing = fs::read_to_string(dir.path().join("listing.txt")).unwrap();
        assert!(listing.contains("GPS (2 fields)"));

        let cleaned = load(&dir.path().join("clean.exif"));
        assert_eq!(
            cleaned.sections(),
            vec![SectionId::PRIMARY, SectionId::EXIF, SectionId::INTEROP, SectionId::MAKER]
        );
        assert_eq!(cleaned.tiff.sections[&SectionId::PRIMARY].entries.len(), 3);
    }

    #[test]
    fn jpeg_round_trip_keeps_segment_order() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("photo.jpg");
        let block = sample(ByteOrder::Big).encode(&Control::default());
        fs::write(&input, jpeg_with_exif(&block)).unwrap();
        let output = dir.path().join("clean.jpg");

        let config = Config {
            output: Some(output.clone()),
            plan: DeletionPlan::parse("0:0x131,3").unwrap(),
            ..Config::new(&input)
        };
        run(&config, &ExifLoader, &mut Vec::new()).unwrap();

        let written = fs::read(&output).unwrap();
        assert_eq!(segment_markers(&written), segment_markers(&fs::read(&input).unwrap()));
        assert_eq!(segment_markers(&written)[1], 0xE1);

        let cleaned = load(&output);
        assert_eq!(cleaned.container, Container::Image);
        assert!(!cleaned.sections().contains(&SectionId::GPS));
        assert!(cleaned.tiff.sections[&SectionId::PRIMARY].get(0x0131).is_none());
        assert_eq!(cleaned.thumbnails(), load(&input).thumbnails());
    }

    #[test]
    fn png_round_trip() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("image.png");
        let block = sample(ByteOrder::Little).encode(&Control::default());
        fs::write(&input, png_with_exif(&block)).unwrap();

        let mut store = load(&input);
        assert_eq!(store.container, Container::Image);
        store.remove_section(SectionId::THUMBNAIL).unwrap();
        let output = dir.path().join("clean.png");
        store.persist(&output).unwrap();

        let written = fs::read(&output).unwrap();
        assert!(written.starts_with(b"\x89PNG"));
        let cleaned = load(&output);
        assert!(cleaned.thumbnails().is_empty());
        assert_eq!(cleaned.sections().len(), 5);
    }

    #[test]
    fn failed_removal_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("clean.exif");
        let config = Config {
            output: Some(output.clone()),
            plan: DeletionPlan::parse("6").unwrap(),
            ..Config::new(sample_file(&dir))
        };
        let err = run(&config, &ExifLoader, &mut Vec::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "applying deletions: cannot remove embedded section: section is not present"
        );
        assert!(!output.exists());
    }
}
