use clap::{ArgAction, Args};
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Args, Debug)]
pub struct ReaderOpts {
    /// The directory containing the source documents and resources
    #[arg(long, short = 's', default_value = "content")]
    pub source: PathBuf,

    /// Only convert files at the top level of the source directory
    #[arg(long = "no-recurse", action = ArgAction::SetFalse)]
    pub recurse: bool,
}

pub struct FileEntry {
    pub path: PathBuf,
    pub metadata: Metadata,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }
}

/// Walk a directory, returning every file and directory found, sorted by path so runs over the
/// same tree always visit entries in the same order. Directories are listed before their contents.
/// If recurse is false, only the top level is read. A directory equal to `exclude` is skipped
/// along with everything below it; it is compared after canonicalization.
pub fn walk(path: impl AsRef<Path>, recurse: bool, exclude: Option<&Path>) -> Result<Vec<FileEntry>> {
    let mut entries = vec![];
    walk_into(path.as_ref(), recurse, exclude, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn walk_into(
    path: &Path,
    recurse: bool,
    exclude: Option<&Path>,
    entries: &mut Vec<FileEntry>,
) -> Result<()> {
    let dir = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {}", path.display()))?;
    for entry in dir {
        let entry = entry?;
        let p = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            if exclude.is_some_and(|ex| p.canonicalize().is_ok_and(|c| c == ex)) {
                log::debug!("Skipping excluded directory {}", p.display());
                continue;
            }
            if recurse {
                entries.push(FileEntry {
                    path: p.clone(),
                    metadata,
                });
                walk_into(&p, true, exclude, entries)?;
            }
        } else if metadata.is_file() {
            entries.push(FileEntry { path: p, metadata });
        }
    }
    Ok(())
}
