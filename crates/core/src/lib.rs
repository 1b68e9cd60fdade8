//! Core library for building a static site out of a directory of Markdown, reStructuredText and
//! static resources.
//!
//! Each source file is matched to a [`Parser`] by its extension. Documents have their leading
//! metadata block split off with [`Content::load`] and the body rendered to HTML; resources are
//! copied as is. [`Site::build`] walks a whole source tree and collects a [`BuildReport`] that the
//! [`printer`] module knows how to display.

pub mod content;
pub mod error;
pub mod markdown;
pub mod parser;
pub mod printer;
pub mod reader;
pub mod rst;
pub mod site;

pub use content::{Content, Metadata};
pub use error::{Error, ErrorKind, Result};
pub use parser::{Conversion, Parser};
pub use site::{BuildReport, Failure, Site};
