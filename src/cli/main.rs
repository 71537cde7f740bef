use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use std::any::Any;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use exifcheck::Error;
use exifcheck::config::{self, Config, Control, Extraction, PrintSelection};
use exifcheck::exif::ExifLoader;
use exifcheck::pipeline::{self, Report};
use exifcheck::plan::DeletionPlan;

const AFTER_HELP: &str = "\
--tiff prints the primary and thumbnail sections, --exif the exif, gps and
interoperability sections, --maker the maker notes. --unknown keep|remove only
matters when an output file is written. The maker thumbnail may be called
preview by some makers.

Removal specification: section[:field]*[,section[:field]*]*
  numbers are decimal or 0x-prefixed hexadecimal
  sections: 0 primary, 1 thumbnail, 2 exif, 3 gps, 4 interoperability,
            5 maker, 6 embedded preview
  e.g. -r 0:0x131:0x132,3 removes Software and DateTime from the primary
  section, and the whole gps section
  the fields locating other sections (0x8769, 0x8825, 0xa005, 0x201, 0x202)
  are rewritten on output: remove the section they locate instead";

#[derive(Parser, Debug)]
#[command(
    name = "exifcheck",
    version,
    about = "Check a file for EXIF metadata, print it, extract it, or remove parts of it",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Image file to process (exactly one)
    #[arg(value_name = "FILE")]
    paths: Vec<PathBuf>,

    /// Print TIFF metadata (primary and thumbnail sections)
    #[arg(long)]
    tiff: bool,

    /// Print EXIF metadata (exif, gps and interoperability sections)
    #[arg(long)]
    exif: bool,

    /// Print maker notes
    #[arg(long)]
    maker: bool,

    /// Print all metadata and maker notes
    #[arg(long)]
    all: bool,

    /// Print metadata to this file (stdout by default)
    #[arg(short, long, value_name = "FILE")]
    print: Option<String>,

    /// Print thumbnail type, size and origin
    #[arg(short = 't', long)]
    thumbnails: bool,

    /// Extract the original metadata into a new file
    #[arg(long, value_name = "FILE")]
    extract_original: Option<String>,

    /// Extract the EXIF thumbnail, if available, into a new file
    #[arg(long, value_name = "FILE")]
    extract_thumbnail: Option<String>,

    /// Extract the maker thumbnail, if available, into a new file
    #[arg(long, value_name = "FILE")]
    extract_maker_thumbnail: Option<String>,

    /// Write the processed file to this path
    #[arg(short, long, value_name = "FILE")]
    output: Option<String>,

    /// Sections and fields to remove before writing the output
    #[arg(short, long, value_name = "SPEC")]
    remove: Option<String>,

    /// What to do with unknown fields: keep, remove or stop
    #[arg(short, long, value_name = "ACTION", default_value = "keep")]
    unknown: String,

    /// Warn about parsing issues in the metadata
    #[arg(short, long)]
    warn: bool,

    /// Trace metadata parsing
    #[arg(long)]
    parse_debug: bool,

    /// Trace metadata serialization (when writing the output)
    #[arg(long)]
    serialize_debug: bool,

    /// Print a JSON report of the run
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // exit code 2 is kept for internal faults
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    // Set up logging
    let log_level = if cli.verbose || cli.parse_debug || cli.serialize_debug {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("exifcheck: {e}");
            let code = e.downcast_ref::<Error>().map_or(1, Error::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;

    let report = {
        let mut stdout = std::io::stdout().lock();
        run_guarded(&config, &mut stdout)?
    };

    if cli.json {
        let json = serde_json::json!({
            "config": config,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    }

    Ok(())
}

/// Turn the command line into a pipeline configuration.
fn build_config(cli: &Cli) -> exifcheck::Result<Config> {
    let input = match cli.paths.as_slice() {
        [] => {
            return Err(Error::Argument(
                "missing the name of the file to process".into(),
            ));
        }
        [input] => input.clone(),
        _ => {
            return Err(Error::Argument(
                "too many files specified (only 1 file at a time)".into(),
            ));
        }
    };

    let control = Control {
        unknown: cli.unknown.parse()?,
        warn: cli.warn,
        parse_debug: cli.parse_debug,
        serialize_debug: cli.serialize_debug,
    };

    let print = if cli.all {
        PrintSelection::all()
    } else {
        PrintSelection {
            tiff: cli.tiff,
            exif: cli.exif,
            maker: cli.maker,
        }
    };

    let plan = match cli.remove.as_deref() {
        Some(spec) => DeletionPlan::parse(spec)?,
        None => DeletionPlan::default(),
    };
    if !plan.is_empty() {
        log::debug!(
            "Deletion plan: {} section(s), {} field(s)",
            plan.sections.len(),
            plan.field_count()
        );
    }

    Ok(Config {
        input,
        control,
        print,
        print_to: path(&cli.print),
        show_thumbnails: cli.thumbnails,
        extract: Extraction {
            original: path(&cli.extract_original),
            thumbnail: path(&cli.extract_thumbnail),
            maker_thumbnail: path(&cli.extract_maker_thumbnail),
        },
        output: path(&cli.output),
        plan,
    })
}

fn path(value: &Option<String>) -> Option<PathBuf> {
    config::non_empty(value.as_ref().map(PathBuf::from))
}

/// Run the pipeline, turning a panic inside the metadata store into an internal error.
fn run_guarded(config: &Config, console: &mut dyn Write) -> exifcheck::Result<Report> {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|info| {
        log::error!("Metadata store panicked: {info}");
    }));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pipeline::run(config, &ExifLoader, console)
    }));
    std::panic::set_hook(prev_hook);

    result.unwrap_or_else(|payload| Err(Error::Internal(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
