use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{self, Config, Control};
use crate::error::{Error, Result};
use crate::plan::{FieldId, SectionId};

/// Which thumbnail to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailKind {
    /// The thumbnail referenced by the thumbnail section.
    Exif,
    /// The preview embedded in the maker notes.
    Maker,
}

impl fmt::Display for ThumbnailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThumbnailKind::Exif => f.write_str("exif"),
            ThumbnailKind::Maker => f.write_str("maker"),
        }
    }
}

/// One thumbnail found in a metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailInfo {
    /// Section the thumbnail belongs to.
    pub origin: SectionId,
    /// Compression scheme, e.g. `JPEG`.
    pub compression: String,
    /// Size in bytes.
    pub size: usize,
}

impl fmt::Display for ThumbnailInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} type {} size {}", self.origin, self.compression, self.size)
    }
}

/// Loads a metadata store from a file.
///
/// The pipeline calls [`load`](MetadataSource::load) exactly once per run.
pub trait MetadataSource {
    type Store: MetadataStore;

    fn load(&self, path: &Path, control: &Control) -> Result<Self::Store>;
}

/// A decoded, mutable set of metadata sections.
///
/// Implement this trait to plug a different metadata library into the
/// pipeline. The crate ships [`ExifStore`](crate::exif::ExifStore).
pub trait MetadataStore {
    /// Thumbnails present in the store.
    fn thumbnails(&self) -> Vec<ThumbnailInfo>;

    /// Write a readable listing of `sections` to `out`. Absent sections are skipped.
    fn format_sections(&self, out: &mut dyn Write, sections: &[SectionId]) -> Result<()>;

    /// Write the metadata block as it was loaded, before any change. Returns the byte count.
    fn write_original(&self, path: &Path) -> Result<usize>;

    /// Write the raw bytes of a thumbnail. Returns the byte count.
    fn write_thumbnail(&self, path: &Path, kind: ThumbnailKind) -> Result<usize>;

    fn remove_field(&mut self, section: SectionId, field: FieldId) -> Result<()>;

    fn remove_section(&mut self, section: SectionId) -> Result<()>;

    /// Serialize the current state of the store. Returns the byte count.
    fn persist(&self, path: &Path) -> Result<usize>;
}

/// What a pipeline run did.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub input: PathBuf,
    pub thumbnails: Vec<ThumbnailInfo>,
    pub printed_sections: Vec<SectionId>,
    pub extracted: Vec<PathBuf>,
    pub removed_fields: usize,
    pub removed_sections: Vec<SectionId>,
    pub output: Option<PathBuf>,
}

/// Run every stage requested by `config` against one store loaded from `source`.
///
/// Stages run in a fixed order: inspect thumbnails, format sections, extract
/// the original metadata, extract thumbnails, apply deletions, persist. The
/// first failing stage stops the run. Changes already made to the in-memory
/// store are not rolled back; only persisting touches the output file.
///
/// Thumbnail lines, and formatted sections without a `print_to` file, go to
/// `console`.
///
/// # Example
///
/// ```rust,no_run
/// use exifcheck::config::Config;
/// use exifcheck::exif::ExifLoader;
/// use exifcheck::pipeline::run;
/// use exifcheck::plan::DeletionPlan;
///
/// # fn example() -> exifcheck::Result<()> {
/// let config = Config {
///     plan: DeletionPlan::parse("3")?,
///     output: Some("no-gps.jpg".into()),
///     ..Config::new("photo.jpg")
/// };
/// let report = run(&config, &ExifLoader, &mut std::io::stdout())?;
/// println!("removed {} section(s)", report.removed_sections.len());
/// # Ok(())
/// # }
/// ```
pub fn run<S: MetadataSource>(
    config: &Config,
    source: &S,
    console: &mut dyn Write,
) -> Result<Report> {
    let mut report = Report {
        input: config.input.clone(),
        ..Report::default()
    };

    log::info!("Checking file {}", config.input.display());
    let mut store = source
        .load(&config.input, &config.control)
        .map_err(|e| e.in_stage(format!("loading {}", config.input.display())))?;

    if config.show_thumbnails {
        report.thumbnails = store.thumbnails();
        for thumbnail in &report.thumbnails {
            writeln!(console, "{thumbnail}")
                .map_err(|e| Error::io("<console>", e).in_stage("listing thumbnails"))?;
        }
    }

    let sections = config.print.sections();
    if !sections.is_empty() {
        log::debug!(
            "Formatting {} section(s) to {}",
            sections.len(),
            config::describe(config.print_to.as_deref())
        );
        format_to(&store, config.print_to.as_deref(), console, &sections)
            .map_err(|e| e.in_stage("formatting sections"))?;
        report.printed_sections = sections;
    }

    if let Some(ref path) = config.extract.original {
        let written = store
            .write_original(path)
            .map_err(|e| e.in_stage(format!("writing original metadata to {}", path.display())))?;
        log::info!("Original metadata ({written} bytes) written to {}", path.display());
        report.extracted.push(path.clone());
    }

    let thumbnails = [
        (ThumbnailKind::Exif, &config.extract.thumbnail),
        (ThumbnailKind::Maker, &config.extract.maker_thumbnail),
    ];
    for (kind, target) in thumbnails {
        if let Some(path) = target {
            let written = store.write_thumbnail(path, kind).map_err(|e| {
                e.in_stage(format!("writing {kind} thumbnail to {}", path.display()))
            })?;
            log::info!("{kind} thumbnail ({written} bytes) written to {}", path.display());
            report.extracted.push(path.clone());
        }
    }

    if config.wants_deletions() {
        apply_deletions(&mut store, config, &mut report)
            .map_err(|e| e.in_stage("applying deletions"))?;
    }

    if let Some(ref path) = config.output {
        let written = store
            .persist(path)
            .map_err(|e| e.in_stage(format!("writing output to {}", path.display())))?;
        log::info!("Metadata ({written} bytes) written to {}", path.display());
        report.output = Some(path.clone());
    }

    Ok(report)
}

/// Field deletions first, in plan order, then whole sections.
fn apply_deletions<T: MetadataStore>(
    store: &mut T,
    config: &Config,
    report: &mut Report,
) -> Result<()> {
    for group in &config.plan.groups {
        for &field in &group.fields {
            log::debug!("Removing field {field} from {} section", group.section);
            store.remove_field(group.section, field)?;
            report.removed_fields += 1;
        }
    }

    for &section in &config.plan.sections {
        log::debug!("Removing {section} section");
        store.remove_section(section)?;
        report.removed_sections.push(section);
    }

    log::info!(
        "Removed {} field(s) and {} section(s)",
        report.removed_fields,
        report.removed_sections.len()
    );
    Ok(())
}

/// Format to a freshly created file, or to the console.
fn format_to<T: MetadataStore>(
    store: &T,
    path: Option<&Path>,
    console: &mut dyn Write,
    sections: &[SectionId],
) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|e| Error::io(path, e))?;
            let mut out = BufWriter::new(file);
            store.format_sections(&mut out, sections)?;
            out.flush().map_err(|e| Error::io(path, e))
        }
        None => {
            store.format_sections(console, sections)?;
            console.flush().map_err(|e| Error::io("<console>", e))
        }
    }
}
