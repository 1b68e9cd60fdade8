use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    parser::{self, Conversion, Parser},
    reader,
};

/// A source tree and the destination it is built into
#[derive(Debug, Clone)]
pub struct Site {
    /// The directory containing documents and resources
    pub source: PathBuf,
    /// The directory output is written to. Created if it does not exist
    pub dest: PathBuf,
    /// Whether to descend into subdirectories of the source
    pub recurse: bool,
    /// Abort on the first file that fails instead of logging it and moving on
    pub fail_fast: bool,
}

/// A file that could not be converted
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub path: PathBuf,
    pub error: String,
}

/// Everything that happened during a build
#[derive(Debug, Default, Serialize)]
pub struct BuildReport {
    /// Files that were converted or copied, in the order they were processed
    pub conversions: Vec<Conversion>,
    /// Files skipped because no parser handles their extension
    pub skipped: Vec<PathBuf>,
    /// Files that failed to convert
    pub failures: Vec<Failure>,
}

impl BuildReport {
    /// The conversions that rendered a document, leaving out copied resources
    pub fn documents(&self) -> impl Iterator<Item = &Conversion> {
        self.conversions.iter().filter(|c| c.parser.is_document())
    }
}

impl Site {
    /// Create a site with the default options: recursive and tolerant of per-file failures
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            recurse: true,
            fail_fast: false,
        }
    }

    /// Build the site in a single pass over the source tree. Every source directory is mirrored
    /// under the destination and every file with a known extension is handed to its parser. Files
    /// are processed one at a time; a failure leaves already written output in place.
    pub fn build(&self) -> Result<BuildReport> {
        std::fs::create_dir_all(&self.dest).with_context(|| {
            format!(
                "Failed to create destination directory {}",
                self.dest.display()
            )
        })?;
        // The destination may live inside the source tree, in which case it must not be read back
        let exclude = self.dest.canonicalize().with_context(|| {
            format!("Failed to resolve destination {}", self.dest.display())
        })?;
        let source = self.source.canonicalize().with_context(|| {
            format!("Failed to resolve source {}", self.source.display())
        })?;
        if source == exclude {
            anyhow::bail!(
                "Source and destination are both {}, output would overwrite the sources",
                source.display()
            );
        }

        let entries = reader::walk(&self.source, self.recurse, Some(&exclude))?;
        let mut report = BuildReport::default();

        for entry in entries {
            if entry.is_dir() {
                self.create_dir(&entry.path)?;
                continue;
            }

            let Some(parser) = Parser::for_path(&entry.path) else {
                log::warn!(
                    "No parser for the {} extension, {} skipped",
                    parser::extension_of(&entry.path).unwrap_or_else(|| "(none)".to_string()),
                    entry.path.display()
                );
                report.skipped.push(entry.path);
                continue;
            };

            match parser.parse(&entry.path, &self.source, &self.dest) {
                Ok(conversion) => report.conversions.push(conversion),
                Err(e) if self.fail_fast => {
                    return Err(e)
                        .with_context(|| format!("Failed to convert {}", entry.path.display()));
                }
                Err(e) => {
                    let error = error_chain(&e);
                    log::error!("Ignoring error when converting file: {error}");
                    report.failures.push(Failure {
                        path: entry.path,
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        let relative = path.strip_prefix(&self.source).with_context(|| {
            format!(
                "{} is not inside {}",
                path.display(),
                self.source.display()
            )
        })?;
        let directory = self.dest.join(relative);
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create directory {}", directory.display()))
    }
}

fn error_chain(error: &crate::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}
