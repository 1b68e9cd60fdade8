use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    content::{Content, Metadata},
    error::{Error, Result},
    markdown, rst,
};

/// The extension given to every converted document
pub const HTML_EXTENSION: &str = ".html";

/// The kinds of source file that can be turned into site output. Each variant owns a fixed set of
/// file extensions, written with their leading dot (e.g. `.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Parser {
    /// Static files copied verbatim
    Resource,
    /// Markdown documents rendered to HTML
    Markdown,
    /// reStructuredText documents rendered to HTML
    ReStructuredText,
}

impl Parser {
    /// Every parser in dispatch order. When two parsers claim the same extension, the earlier one
    /// wins.
    pub const ALL: [Parser; 3] = [
        Parser::Resource,
        Parser::Markdown,
        Parser::ReStructuredText,
    ];

    /// The file extensions this parser handles
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Parser::Resource => &[".jpg", ".png", ".gif", ".css", ".html"],
            Parser::Markdown => &[".md", ".markdown"],
            Parser::ReStructuredText => &[".rst"],
        }
    }

    /// Whether this parser handles the given extension. Matching is exact and case sensitive, so
    /// `.MD` is not a markdown extension.
    pub fn valid_extension(&self, extension: &str) -> bool {
        self.extensions().contains(&extension)
    }

    /// Select the first parser that handles the given extension
    pub fn for_extension(extension: &str) -> Option<Parser> {
        Self::ALL
            .into_iter()
            .find(|parser| parser.valid_extension(extension))
    }

    /// Select the parser for a file based on its extension
    pub fn for_path(path: impl AsRef<Path>) -> Option<Parser> {
        extension_of(path.as_ref()).and_then(|ext| Self::for_extension(&ext))
    }

    /// Whether this parser renders documents to HTML rather than copying them
    pub fn is_document(&self) -> bool {
        !matches!(self, Parser::Resource)
    }

    /// Convert or copy the file at `path`, which must live under `source`, into the matching
    /// location under `dest`. Missing directories under `dest` are created. An existing output file
    /// is overwritten.
    pub fn parse(&self, path: &Path, source: &Path, dest: &Path) -> Result<Conversion> {
        let render: fn(&str) -> String = match self {
            Parser::Resource => {
                let output = copy(path, source, dest)?;
                log::debug!("Copied {} to {}", path.display(), output.display());
                return Ok(Conversion {
                    parser: *self,
                    source: path.to_path_buf(),
                    output,
                    metadata: Metadata::new(),
                });
            }
            Parser::Markdown => markdown::to_html,
            Parser::ReStructuredText => rst::to_html,
        };

        let relative = relative_to(path, source)?;
        let content = Content::load(&read(path)?);
        let output = write(relative, dest, &render(&content.body), HTML_EXTENSION)?;
        log::info!(
            "Converted {} to {} with metadata {}",
            path.display(),
            output.display(),
            content.metadata
        );

        Ok(Conversion {
            parser: *self,
            source: path.to_path_buf(),
            output,
            metadata: content.metadata,
        })
    }
}

impl fmt::Display for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parser::Resource => "resource",
            Parser::Markdown => "markdown",
            Parser::ReStructuredText => "restructuredtext",
        };
        write!(f, "{}", s)
    }
}

/// The result of handling a single source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversion {
    /// The parser that handled the file
    pub parser: Parser,
    /// The source file that was read
    pub source: PathBuf,
    /// The file that was written
    pub output: PathBuf,
    /// Metadata extracted from the document. Always empty for copied resources
    pub metadata: Metadata,
}

impl Conversion {
    /// The file name of the source file, for display purposes
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// The extension of `path` including its leading dot, in the form [`Parser::valid_extension`]
/// expects
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
}

/// Read a whole file as UTF-8 text
pub fn read(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| Error::read(path, e))?;
    String::from_utf8(bytes).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Where a document at `relative` (relative to the source root) is written under `dest`
pub fn output_path(relative: &Path, dest: &Path, extension: &str) -> PathBuf {
    dest.join(relative)
        .with_extension(extension.trim_start_matches('.'))
}

/// Write `content` to the output location for `relative` with its extension replaced by
/// `extension`, returning the path written
pub fn write(relative: &Path, dest: &Path, content: &str, extension: &str) -> Result<PathBuf> {
    let target = output_path(relative, dest, extension);
    ensure_parent(&target)?;
    fs::write(&target, content).map_err(|e| Error::write(&target, e))?;
    Ok(target)
}

/// Copy `path` byte for byte to the same relative location under `dest`, keeping its permissions
/// and modification time, returning the path written
pub fn copy(path: &Path, source: &Path, dest: &Path) -> Result<PathBuf> {
    let target = dest.join(relative_to(path, source)?);
    // fs::copy truncates the target before reading, which would empty a file copied onto itself
    if is_same_file(path, &target) {
        return Err(Error::SameFile {
            path: path.to_path_buf(),
        });
    }
    ensure_parent(&target)?;
    fs::copy(path, &target).map_err(|e| Error::Copy {
        from: path.to_path_buf(),
        to: target.clone(),
        source: e,
    })?;
    preserve_modified(path, &target);
    Ok(target)
}

fn relative_to<'a>(path: &'a Path, source: &Path) -> Result<&'a Path> {
    path.strip_prefix(source).map_err(|_| Error::OutsideRoot {
        path: path.to_path_buf(),
        root: source.to_path_buf(),
    })
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn ensure_parent(target: &Path) -> Result<()> {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| Error::create_dir(parent, e))
        }
        _ => Ok(()),
    }
}

fn preserve_modified(from: &Path, to: &Path) {
    let result = fs::metadata(from)
        .and_then(|meta| meta.modified())
        .and_then(|modified| {
            fs::File::open(to)?.set_modified(modified)
        });
    if let Err(e) = result {
        log::debug!(
            "Unable to preserve modification time on {}: {e}",
            to.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    #[test]
    fn each_parser_accepts_only_its_extensions() {
        let all_extensions: Vec<&str> = Parser::ALL
            .iter()
            .flat_map(|p| p.extensions().iter().copied())
            .collect();

        for parser in Parser::ALL {
            for ext in &all_extensions {
                assert_eq!(
                    parser.valid_extension(ext),
                    parser.extensions().contains(ext),
                    "{parser} and {ext}"
                );
            }
            assert!(!parser.valid_extension(".txt"));
            assert!(!parser.valid_extension(""));
        }
    }

    #[test]
    fn extension_matching_is_case_sensitive() {
        assert!(Parser::Markdown.valid_extension(".md"));
        assert!(!Parser::Markdown.valid_extension(".MD"));
        assert!(!Parser::Resource.valid_extension(".PNG"));
        assert!(!Parser::ReStructuredText.valid_extension(".Rst"));
        assert_eq!(Parser::for_path("README.MD"), None);
    }

    #[test]
    fn extension_requires_leading_dot() {
        assert!(!Parser::Markdown.valid_extension("md"));
        assert_eq!(Parser::for_extension("rst"), None);
    }

    #[test]
    fn dispatch_selects_by_extension() {
        assert_eq!(Parser::for_extension(".png"), Some(Parser::Resource));
        assert_eq!(Parser::for_extension(".html"), Some(Parser::Resource));
        assert_eq!(Parser::for_extension(".markdown"), Some(Parser::Markdown));
        assert_eq!(Parser::for_extension(".rst"), Some(Parser::ReStructuredText));
        assert_eq!(Parser::for_extension(".txt"), None);

        assert_eq!(Parser::for_path("posts/hello.md"), Some(Parser::Markdown));
        assert_eq!(Parser::for_path("archive.tar.css"), Some(Parser::Resource));
        assert_eq!(Parser::for_path("Makefile"), None);
        assert_eq!(Parser::for_path(".css"), None);
    }

    #[test]
    fn output_path_replaces_extension_and_keeps_directories() {
        let dest = Path::new("/site");
        assert_eq!(
            output_path(Path::new("hello.md"), dest, HTML_EXTENSION),
            PathBuf::from("/site/hello.html")
        );
        assert_eq!(
            output_path(Path::new("blog/2024/post.rst"), dest, HTML_EXTENSION),
            PathBuf::from("/site/blog/2024/post.html")
        );
        assert_eq!(
            output_path(Path::new("notes"), dest, ".html"),
            PathBuf::from("/site/notes.html")
        );
    }

    #[test]
    fn read_rejects_invalid_utf8() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("bad.md");
        fs::write(&path, [0x66, 0x6f, 0xff, 0x6f])?;

        let err = read(&path).expect_err("invalid UTF-8 should fail");
        assert_eq!(err.kind(), crate::ErrorKind::Decoding);

        let err = read(dir.path().join("missing.md")).expect_err("missing file should fail");
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        Ok(())
    }

    #[test]
    fn write_creates_directories_and_overwrites() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let relative = Path::new("nested/deeper/page.md");

        let first = write(relative, dir.path(), "first", HTML_EXTENSION)?;
        assert_eq!(first, dir.path().join("nested/deeper/page.html"));
        assert_eq!(fs::read_to_string(&first)?, "first");

        let second = write(relative, dir.path(), "second", HTML_EXTENSION)?;
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second)?, "second");
        Ok(())
    }

    #[test]
    fn copy_is_byte_identical_and_keeps_mtime() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let dest = TempDir::new()?;
        let path = source.path().join("img/logo.png");
        fs::create_dir_all(path.parent().unwrap())?;
        let bytes: Vec<u8> = (0..=255).collect();
        fs::write(&path, &bytes)?;

        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(modified)?;

        let target = copy(&path, source.path(), dest.path())?;
        assert_eq!(target, dest.path().join("img/logo.png"));
        assert_eq!(fs::read(&target)?, bytes);
        assert_eq!(fs::metadata(&target)?.modified()?, modified);
        Ok(())
    }

    #[test]
    fn copy_onto_itself_is_refused() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("logo.png");
        fs::write(&path, [1, 2, 3, 4, 5])?;

        let err = copy(&path, dir.path(), dir.path()).expect_err("copy onto itself should fail");
        assert!(matches!(err, Error::SameFile { .. }), "{err}");
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert_eq!(fs::read(&path)?, [1, 2, 3, 4, 5]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn copy_keeps_mtime_of_read_only_files() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let source = TempDir::new()?;
        let dest = TempDir::new()?;
        let path = source.path().join("style.css");
        fs::write(&path, "body {}")?;
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(modified)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444))?;

        let target = copy(&path, source.path(), dest.path())?;
        assert_eq!(fs::metadata(&target)?.permissions().mode() & 0o777, 0o444);
        assert_eq!(fs::metadata(&target)?.modified()?, modified);
        Ok(())
    }

    #[test]
    fn parse_rejects_files_outside_the_source_root() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let other = TempDir::new()?;
        let dest = TempDir::new()?;
        let path = other.path().join("stray.md");
        fs::write(&path, "# Stray")?;

        let err = Parser::Markdown
            .parse(&path, source.path(), dest.path())
            .expect_err("file outside the root should fail");
        assert!(matches!(err, Error::OutsideRoot { .. }));
        Ok(())
    }

    #[test]
    fn parse_markdown_reports_metadata() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let dest = TempDir::new()?;
        let path = source.path().join("hello.md");
        fs::write(&path, "title: Hi\n\n# Hello\n")?;

        let conversion = Parser::Markdown.parse(&path, source.path(), dest.path())?;
        assert_eq!(conversion.parser, Parser::Markdown);
        assert_eq!(conversion.output, dest.path().join("hello.html"));
        assert_eq!(conversion.metadata.get("title"), Some("Hi"));
        assert_eq!(conversion.file_name(), "hello.md");

        let html = fs::read_to_string(&conversion.output)?;
        assert!(html.contains("<h1>Hello</h1>"), "{html}");
        assert!(!html.contains("title"), "{html}");
        Ok(())
    }
}
