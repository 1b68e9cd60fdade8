use std::{io::Write, path::PathBuf};

use clap::Parser;

use ssg_core::{
    Site,
    printer::{self, Format},
    reader,
};

/// A command line tool for building a static site from Markdown, reStructuredText and static
/// resources.
///
/// Every file in the source directory is converted or copied into the destination directory,
/// keeping its relative location. Markdown (`.md`, `.markdown`) and reStructuredText (`.rst`)
/// documents become `.html` files with any leading metadata block removed. Images, stylesheets and
/// existing HTML are copied unchanged. Anything else is skipped with a warning.
#[derive(Parser, Debug)]
#[command(name = "ssg", about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub printer: printer::PrinterArgs,

    #[command(flatten)]
    pub read_opts: reader::ReaderOpts,

    /// The directory to write the built site to. It is created if it does not exist
    #[arg(long, short = 'd', default_value = "dist")]
    pub dest: PathBuf,

    /// Stop at the first file that fails to convert instead of logging it and continuing
    #[arg(long)]
    pub fail_fast: bool,

    /// Disable colored status lines
    #[arg(long)]
    pub no_color: bool,

    /// Print a table of every converted and copied file once the build finishes. Only used with
    /// plain output
    #[arg(long)]
    pub summary: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if cli.no_color {
        colored::control::set_override(false);
    }

    let site = Site {
        source: cli.read_opts.source.clone(),
        dest: cli.dest.clone(),
        recurse: cli.read_opts.recurse,
        fail_fast: cli.fail_fast,
    };
    let report = site.build()?;
    log::info!(
        "Built {} into {}: {} converted or copied, {} skipped, {} failed",
        site.source.display(),
        site.dest.display(),
        report.conversions.len(),
        report.skipped.len(),
        report.failures.len()
    );

    let format = cli.printer.output;
    let mut writer = std::io::stdout();
    match format {
        Format::Plain => {
            let lines = report.conversions.iter().filter_map(printer::status_line);
            format.print_plain(lines, &mut writer)?;
            if cli.summary && !report.conversions.is_empty() {
                writeln!(writer, "{}", printer::summary_table(&report))?;
            }
        }
        Format::Json | Format::Binary => format.print_structured(&report, &mut writer)?,
    }

    if !report.failures.is_empty() {
        for failure in &report.failures {
            log::debug!("{} failed: {}", failure.path.display(), failure.error);
        }
        anyhow::bail!(
            "{} of {} files failed to convert",
            report.failures.len(),
            report.failures.len() + report.conversions.len()
        );
    }
    Ok(())
}
