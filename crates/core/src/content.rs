//! Splitting a source document into its leading metadata block and its body.
//!
//! Two layouts are recognised at the very top of a document:
//!
//! ```text
//! ---                          title: Hello
//! title: Hello                 author: Someone
//! author: Someone
//! ---                          # Body starts after the blank line
//!
//! # Body starts after the fence
//! ```
//!
//! A metadata line is `key: value`. The key is made of alphanumerics, `_` and `-`, and the first
//! colon must be followed by whitespace or the end of the line, so a URL is never mistaken for
//! metadata. Values are trimmed and one layer of matching quotes is removed. Later keys overwrite
//! earlier ones.
//!
//! Inside a fence (`---` or `+++`), blank lines and `#` comments are ignored. If the fence is never
//! closed or any other line does not parse, the whole block is treated as absent. Without a fence,
//! the metadata is the leading run of metadata lines: a blank line ends it and is dropped, any other
//! line ends it and stays in the body.

use std::{collections::BTreeMap, fmt};

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, space0, space1},
    combinator::{eof, rest},
    sequence::{delimited, preceded, separated_pair},
};
use serde::Serialize;

const FENCES: [&str; 2] = ["---", "+++"];

/// The key/value pairs found in a document's metadata block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create an empty metadata set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value for the same key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value:?}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Metadata(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A source document split into metadata and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Values from the leading metadata block, empty if there was none
    pub metadata: Metadata,
    /// Everything after the metadata block
    pub body: String,
}

impl Content {
    /// Split raw document text into metadata and body. This never fails: text without a
    /// recognisable metadata block comes back unchanged as the body.
    pub fn load(text: &str) -> Content {
        fenced(text)
            .or_else(|| bare(text))
            .unwrap_or_else(|| Content {
                metadata: Metadata::new(),
                body: text.to_string(),
            })
    }
}

fn fenced(text: &str) -> Option<Content> {
    let mut lines = text.split_inclusive('\n');
    let first = lines.next()?;
    let fence = first.trim_end();
    if !FENCES.contains(&fence) {
        return None;
    }

    let mut metadata = Metadata::new();
    let mut offset = first.len();
    for line in lines {
        offset += line.len();
        let trimmed = line.trim_end();
        if trimmed == fence {
            return Some(Content {
                metadata,
                body: text[offset..].to_string(),
            });
        }
        let stripped = trimmed.trim_start();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let (key, value) = metadata_line(trimmed)?;
        metadata.insert(key, value);
    }
    // Never closed
    None
}

fn bare(text: &str) -> Option<Content> {
    let mut metadata = Metadata::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if !metadata.is_empty() {
                offset += line.len();
            }
            break;
        }
        let Some((key, value)) = metadata_line(trimmed) else {
            break;
        };
        metadata.insert(key, value);
        offset += line.len();
    }

    if metadata.is_empty() {
        return None;
    }
    Some(Content {
        metadata,
        body: text[offset..].to_string(),
    })
}

/// Parse a single `key: value` line, returning the trimmed key and unquoted value
fn metadata_line(line: &str) -> Option<(&str, &str)> {
    let result: IResult<&str, (&str, &str)> = separated_pair(
        delimited(space0, take_while1(is_key_char), space0),
        char(':'),
        alt((preceded(space1, rest), eof)),
    )
    .parse(line);

    result
        .ok()
        .map(|(_, (key, value))| (key, strip_quotes(value.trim())))
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_metadata_is_unchanged() {
        for text in [
            "",
            "# Hello\n\nWorld\n",
            "Title\n=====\n\nBody text.\n",
            "\ntitle: after a blank line\n",
            "See http://example.com for details\n",
        ] {
            let content = Content::load(text);
            assert!(content.metadata.is_empty(), "unexpected metadata in {text:?}");
            assert_eq!(content.body, text);
        }
    }

    #[test]
    fn bare_block_ends_at_blank_line() {
        let content = Content::load("title: Hi\nauthor:  Someone Else \n\n# Hello\n");
        assert_eq!(content.metadata.len(), 2);
        assert_eq!(content.metadata.get("title"), Some("Hi"));
        assert_eq!(content.metadata.get("author"), Some("Someone Else"));
        assert_eq!(content.body, "# Hello\n");
    }

    #[test]
    fn bare_block_ends_at_first_non_metadata_line() {
        let content = Content::load("title: Hi\n# Hello\ntags: not metadata\n");
        assert_eq!(content.metadata.len(), 1);
        assert_eq!(content.body, "# Hello\ntags: not metadata\n");
    }

    #[test]
    fn fenced_block_is_extracted() {
        let text = "---\ntitle: \"Quoted: value\"\n\n# a comment\ndate: 2024-01-01\n---\nBody\n";
        let content = Content::load(text);
        assert_eq!(content.metadata.len(), 2);
        assert_eq!(content.metadata.get("title"), Some("Quoted: value"));
        assert_eq!(content.metadata.get("date"), Some("2024-01-01"));
        assert_eq!(content.body, "Body\n");
    }

    #[test]
    fn plus_fence_must_close_with_plus() {
        let content = Content::load("+++\nkey: 'v'\n+++\nrest");
        assert_eq!(content.metadata.get("key"), Some("v"));
        assert_eq!(content.body, "rest");

        let text = "+++\nkey: v\n---\nrest";
        let content = Content::load(text);
        assert!(content.metadata.is_empty());
        assert_eq!(content.body, text);
    }

    #[test]
    fn malformed_fenced_block_is_treated_as_absent() {
        let text = "---\ntitle: ok\nthis is just a paragraph\n---\nBody\n";
        let content = Content::load(text);
        assert!(content.metadata.is_empty());
        assert_eq!(content.body, text);
    }

    #[test]
    fn unclosed_fence_is_treated_as_absent() {
        let text = "---\ntitle: Hi\n\nNo closing fence here\n";
        let content = Content::load(text);
        assert!(content.metadata.is_empty());
        assert_eq!(content.body, text);
    }

    #[test]
    fn duplicate_keys_keep_the_last_value() {
        let content = Content::load("tag: one\ntag: two\n\nbody");
        assert_eq!(content.metadata.len(), 1);
        assert_eq!(content.metadata.get("tag"), Some("two"));
    }

    #[test]
    fn empty_values_and_crlf_are_accepted() {
        let content = Content::load("draft:\r\nslug: hello-world\r\n\r\nBody\r\n");
        assert_eq!(content.metadata.get("draft"), Some(""));
        assert_eq!(content.metadata.get("slug"), Some("hello-world"));
        assert_eq!(content.body, "Body\r\n");
    }

    #[test]
    fn metadata_only_document_has_empty_body() {
        let content = Content::load("title: Only metadata");
        assert_eq!(content.metadata.get("title"), Some("Only metadata"));
        assert_eq!(content.body, "");
    }

    #[test]
    fn display_renders_sorted_quoted_values() {
        let metadata: Metadata = [("title", "Hi"), ("author", "Me")].into_iter().collect();
        assert_eq!(metadata.to_string(), r#"{author: "Me", title: "Hi"}"#);
        assert_eq!(Metadata::new().to_string(), "{}");
    }
}
