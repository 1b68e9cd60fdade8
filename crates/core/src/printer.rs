//! Reporting a build to the terminal, either as colored status lines and a summary table or as a
//! serialized [`BuildReport`].

use std::{fmt::Display, io::Write};

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::{parser::Conversion, site::BuildReport};

#[derive(Debug, Args)]
pub struct PrinterArgs {
    /// How to report the build. "plain" prints a status line per converted document, "json" and
    /// "binary" (CBOR) print the whole build report. Default is "plain"
    #[arg(long, short = 'o', default_value_t = Format::default())]
    pub output: Format,
}

/// The ways a build can be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human readable status lines
    #[default]
    Plain,
    /// The build report as a single JSON document
    Json,
    /// The build report encoded as CBOR
    Binary,
}

impl std::str::FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" => Ok(Format::Plain),
            "json" => Ok(Format::Json),
            "binary" => Ok(Format::Binary),
            other => Err(anyhow::anyhow!(
                "Unknown format: {other}. Expected 'plain', 'json' or 'binary'"
            )),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Format::Plain => "plain",
            Format::Json => "json",
            Format::Binary => "binary",
        })
    }
}

impl Format {
    /// Serialize a report (or any part of one) to `writer`. Only JSON and binary are structured,
    /// so plain is an error.
    pub fn print_structured<S: Serialize, W: Write>(
        &self,
        report: S,
        writer: &mut W,
    ) -> anyhow::Result<()> {
        match self {
            Format::Json => serde_json::to_writer(writer, &report)
                .context("Failed to write the build report as JSON"),
            Format::Binary => ciborium::into_writer(&report, writer)
                .context("Failed to write the build report as CBOR"),
            Format::Plain => anyhow::bail!("The plain format cannot print a structured report"),
        }
    }

    /// Write each line (usually a [`status_line`]) to `writer`. Errors for structured formats.
    pub fn print_plain<I, D, W>(&self, lines: I, writer: &mut W) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = D>,
        D: Display,
        W: Write,
    {
        if *self != Format::Plain {
            anyhow::bail!("The {self} format cannot print status lines");
        }
        for line in lines {
            writeln!(writer, "{line}").context("Failed to write status line")?;
        }
        Ok(())
    }
}

/// The human readable status line for a converted document. Copied resources have no status line.
pub fn status_line(conversion: &Conversion) -> Option<String> {
    conversion.parser.is_document().then(|| {
        format!(
            "{} converted to HTML. Metadata: {}",
            conversion.file_name(),
            conversion.metadata
        )
        .green()
        .bold()
        .to_string()
    })
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Parser")]
    parser: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Output")]
    output: String,
}

/// Render every conversion in the report as a table
pub fn summary_table(report: &BuildReport) -> String {
    let rows = report.conversions.iter().map(|c| SummaryRow {
        parser: c.parser.to_string(),
        source: c.source.display().to_string(),
        output: c.output.display().to_string(),
    });
    Table::new(rows).with(Style::modern()).to_string()
}
