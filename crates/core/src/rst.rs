//! Converter from reStructuredText to an HTML5 body fragment.
//!
//! The output mirrors the `html_body` part of the docutils html5 writer: the document is wrapped in
//! `<main>` and never carries `<html>` or `<head>` elements. A document consisting of a single
//! top-level section has that section's title promoted to `<h1 class="title">`.
//!
//! Supported block markup: section titles (underline and overline styles), paragraphs, bullet,
//! enumerated, definition and field lists, block quotes, literal and doctest blocks, line blocks,
//! transitions, comments, hyperlink targets and the `code`, admonition, `image`, `figure` and
//! `raw` directives. Inline markup covers emphasis, strong emphasis, inline literals, interpreted
//! text with the common roles, hyperlink references and standalone URLs.
//!
//! Conversion never fails. Markup that is not understood is rendered as plain text, and unknown
//! directives are dropped with a warning.

use std::collections::{HashMap, HashSet};

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till1, take_while_m_n, take_while1},
    character::complete::{char, digit1, space1},
    combinator::{eof, rest},
    sequence::{delimited, preceded, separated_pair, terminated},
};

const ADMONITIONS: [&str; 9] = [
    "attention",
    "caution",
    "danger",
    "error",
    "hint",
    "important",
    "note",
    "tip",
    "warning",
];
const URI_SCHEMES: [&str; 4] = ["http://", "https://", "ftp://", "mailto:"];

/// Render a reStructuredText document body as an HTML fragment
pub fn to_html(source: &str) -> String {
    let lines = normalize(source);
    let mut parser = BlockParser::default();
    let items = parser.parse(&lines, true);
    let blocks = parser.nest(items);
    let (title, blocks) = promote_title(blocks);

    let mut renderer = Renderer::new(parser.targets);
    let mut out = String::from("<main>\n");
    if let Some(title) = title {
        out.push_str(&format!(
            "<h1 class=\"title\">{}</h1>\n",
            renderer.inline(&title)
        ));
    }
    renderer.render_blocks(&blocks, &mut out);
    out.push_str("</main>\n");
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Section(Section),
    Paragraph(String),
    Literal {
        text: String,
        class: String,
    },
    BulletList(Vec<Vec<Block>>),
    EnumeratedList {
        style: EnumStyle,
        start: usize,
        items: Vec<Vec<Block>>,
    },
    DefinitionList(Vec<(String, Vec<Block>)>),
    FieldList(Vec<(String, Vec<Block>)>),
    BlockQuote {
        children: Vec<Block>,
        attribution: Option<String>,
    },
    LineBlock(Vec<String>),
    Admonition {
        class: String,
        title: String,
        children: Vec<Block>,
    },
    Image {
        uri: String,
        alt: String,
        caption: Vec<Block>,
    },
    Raw(String),
    Anchor(String),
    Transition,
}

#[derive(Debug, Clone, PartialEq)]
struct Section {
    level: usize,
    id: String,
    title: String,
    children: Vec<Block>,
}

/// Output of the flat block pass. Titles are turned into nested sections afterwards.
enum Item {
    Block(Block),
    Title { style: Adornment, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Adornment {
    ch: char,
    overline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumStyle {
    Arabic,
    LowerAlpha,
    UpperAlpha,
    Auto,
}

impl EnumStyle {
    fn class(self) -> &'static str {
        match self {
            EnumStyle::Arabic | EnumStyle::Auto => "arabic",
            EnumStyle::LowerAlpha => "loweralpha",
            EnumStyle::UpperAlpha => "upperalpha",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumFormat {
    Period,
    Paren,
    Parens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Enumerator {
    style: EnumStyle,
    format: EnumFormat,
    ordinal: usize,
    column: usize,
}

/// Hyperlink targets collected while parsing
#[derive(Debug, Default)]
struct Targets {
    named: HashMap<String, String>,
    anonymous: Vec<String>,
}

#[derive(Default)]
struct BlockParser {
    targets: Targets,
    ids: HashSet<String>,
}

impl BlockParser {
    fn parse(&mut self, lines: &[String], top_level: bool) -> Vec<Item> {
        let mut items = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            if line.is_empty() {
                i += 1;
                continue;
            }

            if indent_of(line) > 0 {
                let (raw, next) = indented_raw(lines, i);
                items.push(Item::Block(self.block_quote(raw)));
                i = next;
                continue;
            }

            if top_level {
                if let Some((title, next)) = title_at(lines, i) {
                    items.push(title);
                    i = next;
                    continue;
                }
            }

            if is_transition(lines, i) {
                items.push(Item::Block(Block::Transition));
                i += 1;
                continue;
            }

            if line == ".." || line.starts_with(".. ") {
                i = self.explicit_markup(lines, i, &mut items);
                continue;
            }

            if let Some((bullet, _)) = bullet_marker(line) {
                let (block, next) = self.bullet_list(lines, i, bullet);
                items.push(Item::Block(block));
                i = next;
                continue;
            }

            if let Some(first) = enumerator(line).filter(|e| starts_enumeration(lines, i, e)) {
                let (block, next) = self.enumerated_list(lines, i, first);
                items.push(Item::Block(block));
                i = next;
                continue;
            }

            if field_marker(line).is_some() {
                let (block, next) = self.field_list(lines, i);
                items.push(Item::Block(block));
                i = next;
                continue;
            }

            if line == "|" || line.starts_with("| ") {
                let (block, next) = line_block(lines, i);
                items.push(Item::Block(block));
                i = next;
                continue;
            }

            if line.starts_with(">>>") {
                let end = lines[i..]
                    .iter()
                    .position(|l| l.is_empty())
                    .map_or(lines.len(), |p| i + p);
                items.push(Item::Block(Block::Literal {
                    text: lines[i..end].join("\n"),
                    class: "code python doctest".to_string(),
                }));
                i = end;
                continue;
            }

            if is_definition_start(lines, i) {
                let (block, next) = self.definition_list(lines, i);
                items.push(Item::Block(block));
                i = next;
                continue;
            }

            i = self.paragraph(lines, i, &mut items);
        }
        items
    }

    /// Parse nested content where section titles are not allowed
    fn parse_blocks(&mut self, lines: &[String]) -> Vec<Block> {
        self.parse(lines, false)
            .into_iter()
            .filter_map(|item| match item {
                Item::Block(block) => Some(block),
                Item::Title { .. } => None,
            })
            .collect()
    }

    fn paragraph(&mut self, lines: &[String], i: usize, items: &mut Vec<Item>) -> usize {
        let mut end = i;
        while end < lines.len() && !lines[end].is_empty() && indent_of(&lines[end]) == 0 {
            end += 1;
        }

        let joined = lines[i..end].join("\n");
        let (text, literal) = match joined.strip_suffix("::") {
            Some(s) if s.trim().is_empty() => (String::new(), true),
            Some(s) if s.ends_with(char::is_whitespace) => (s.trim_end().to_string(), true),
            Some(s) => (format!("{s}:"), true),
            None => (joined.clone(), false),
        };
        if !text.is_empty() {
            items.push(Item::Block(Block::Paragraph(text)));
        }
        if !literal {
            return end;
        }

        let mut j = end;
        while j < lines.len() && lines[j].is_empty() {
            j += 1;
        }
        if j < lines.len() && indent_of(&lines[j]) > 0 {
            let (raw, next) = indented_raw(lines, j);
            items.push(Item::Block(Block::Literal {
                text: dedent_all(raw).join("\n"),
                class: "literal-block".to_string(),
            }));
            return next;
        }
        end
    }

    fn block_quote(&mut self, raw: &[String]) -> Block {
        let mut children = self.parse_blocks(&dedent_all(raw));
        let attribution = match children.last() {
            Some(Block::Paragraph(text)) => ["---", "--", "\u{2014}"]
                .iter()
                .find_map(|marker| text.strip_prefix(marker))
                .filter(|rest| rest.starts_with(' '))
                .map(|rest| rest.split_whitespace().collect::<Vec<_>>().join(" ")),
            _ => None,
        };
        if attribution.is_some() {
            children.pop();
        }
        Block::BlockQuote {
            children,
            attribution,
        }
    }

    fn list_item(&mut self, lines: &[String], i: usize, column: usize) -> (Vec<Block>, usize) {
        let first = lines[i].get(column..).unwrap_or_default().to_string();
        let (raw, next) = indented_raw(lines, i + 1);
        let amount = min_indent(raw).map_or(column, |m| m.min(column));
        let mut item = vec![first];
        item.extend(dedent(raw, amount));
        (self.parse_blocks(&item), next)
    }

    fn bullet_list(&mut self, lines: &[String], mut i: usize, bullet: char) -> (Block, usize) {
        let mut items = Vec::new();
        while let Some((ch, column)) = lines.get(i).and_then(|l| bullet_marker(l)) {
            if ch != bullet {
                break;
            }
            let (item, next) = self.list_item(lines, i, column);
            items.push(item);
            i = next;
        }
        (Block::BulletList(items), i)
    }

    fn enumerated_list(
        &mut self,
        lines: &[String],
        mut i: usize,
        first: Enumerator,
    ) -> (Block, usize) {
        let mut items = Vec::new();
        while let Some(e) = lines.get(i).and_then(|l| enumerator(l)) {
            if e.style != first.style || e.format != first.format {
                break;
            }
            let (item, next) = self.list_item(lines, i, e.column);
            items.push(item);
            i = next;
        }
        let block = Block::EnumeratedList {
            style: first.style,
            start: first.ordinal,
            items,
        };
        (block, i)
    }

    fn field_list(&mut self, lines: &[String], mut i: usize) -> (Block, usize) {
        let mut fields = Vec::new();
        while let Some((name, body)) = lines.get(i).and_then(|l| field_marker(l)) {
            let (raw, next) = indented_raw(lines, i + 1);
            let mut item = vec![body.trim().to_string()];
            item.extend(dedent_all(raw));
            fields.push((name.to_string(), self.parse_blocks(&item)));
            i = next;
        }
        (Block::FieldList(fields), i)
    }

    fn definition_list(&mut self, lines: &[String], mut i: usize) -> (Block, usize) {
        let mut items = Vec::new();
        while is_definition_start(lines, i) {
            // Classifiers after " : " are dropped
            let term = lines[i]
                .split(" : ")
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            let (raw, next) = indented_raw(lines, i + 1);
            items.push((term, self.parse_blocks(&dedent_all(raw))));
            i = next;
        }
        (Block::DefinitionList(items), i)
    }

    /// Handle a comment, hyperlink target or directive starting at `i`
    fn explicit_markup(&mut self, lines: &[String], i: usize, items: &mut Vec<Item>) -> usize {
        let first = lines[i][2..].trim();
        let (raw, next) = indented_raw(lines, i + 1);
        let body = dedent_all(raw);

        if let Some(url) = first.strip_prefix("__:") {
            self.targets.anonymous.push(join_url(url, &body));
        } else if let Some(target) = first.strip_prefix('_') {
            if let Some((name, url)) = split_target(target) {
                let url = join_url(url, &body);
                if url.is_empty() {
                    let id = self.unique_id(&slug(name));
                    self.targets
                        .named
                        .insert(normalize_name(name), format!("#{id}"));
                    items.push(Item::Block(Block::Anchor(id)));
                } else {
                    self.targets.named.insert(normalize_name(name), url);
                }
            }
        } else if let Some((name, args)) = directive_marker(first) {
            if let Some(block) = self.directive(name, args.trim(), &body) {
                items.push(Item::Block(block));
            }
        }
        // Anything else is a comment
        next
    }

    fn directive(&mut self, name: &str, args: &str, body: &[String]) -> Option<Block> {
        let name = name.to_ascii_lowercase();
        let (options, content) = split_options(body);
        match name.as_str() {
            "code" | "code-block" | "sourcecode" => {
                let class = match args.split_whitespace().next() {
                    Some(language) => format!("code {language} literal-block"),
                    None => "code literal-block".to_string(),
                };
                Some(Block::Literal {
                    text: content.join("\n"),
                    class,
                })
            }
            admonition if ADMONITIONS.contains(&admonition) => {
                // Text on the directive line belongs to the first paragraph
                let lines = if args.is_empty() {
                    content
                } else {
                    std::iter::once(args.to_string())
                        .chain(body.iter().cloned())
                        .collect()
                };
                Some(Block::Admonition {
                    class: name.clone(),
                    title: capitalize(&name),
                    children: self.parse_blocks(&lines),
                })
            }
            "admonition" => Some(Block::Admonition {
                class: format!("admonition-{}", slug(args)),
                title: args.to_string(),
                children: self.parse_blocks(&content),
            }),
            "image" | "figure" => {
                let alt = options
                    .get("alt")
                    .cloned()
                    .unwrap_or_else(|| args.to_string());
                let caption = if name == "figure" {
                    self.parse_blocks(&content)
                } else {
                    Vec::new()
                };
                Some(Block::Image {
                    uri: args.to_string(),
                    alt,
                    caption,
                })
            }
            "raw" if args.eq_ignore_ascii_case("html") => Some(Block::Raw(content.join("\n"))),
            _ => {
                log::warn!("Skipping unsupported reStructuredText directive '{name}::'");
                None
            }
        }
    }

    /// Turn the flat list of blocks and titles into nested sections. Heading levels follow the
    /// order in which each adornment style first appears.
    fn nest(&mut self, items: Vec<Item>) -> Vec<Block> {
        let mut styles: Vec<Adornment> = Vec::new();
        let mut root = Vec::new();
        let mut stack: Vec<Section> = Vec::new();

        for item in items {
            match item {
                Item::Block(block) => match stack.last_mut() {
                    Some(section) => section.children.push(block),
                    None => root.push(block),
                },
                Item::Title { style, text } => {
                    let level = match styles.iter().position(|s| *s == style) {
                        Some(pos) => pos + 1,
                        None => {
                            styles.push(style);
                            styles.len()
                        }
                    };
                    while stack.last().is_some_and(|s| s.level >= level) {
                        if let Some(done) = stack.pop() {
                            attach(&mut stack, &mut root, done);
                        }
                    }
                    let plain = strip_markup(&text);
                    let id = self.unique_id(&slug(&plain));
                    self.targets
                        .named
                        .entry(normalize_name(&plain))
                        .or_insert_with(|| format!("#{id}"));
                    stack.push(Section {
                        level,
                        id,
                        title: text,
                        children: Vec::new(),
                    });
                }
            }
        }
        while let Some(done) = stack.pop() {
            attach(&mut stack, &mut root, done);
        }
        root
    }

    fn unique_id(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "section" } else { base };
        let mut id = base.to_string();
        let mut n = 1;
        while !self.ids.insert(id.clone()) {
            id = format!("{base}-{n}");
            n += 1;
        }
        id
    }
}

fn attach(stack: &mut [Section], root: &mut Vec<Block>, section: Section) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Block::Section(section)),
        None => root.push(Block::Section(section)),
    }
}

fn promote_title(mut blocks: Vec<Block>) -> (Option<String>, Vec<Block>) {
    if blocks.len() == 1 && matches!(blocks[0], Block::Section(_)) {
        if let Some(Block::Section(section)) = blocks.pop() {
            return (Some(section.title), section.children);
        }
    }
    (None, blocks)
}

// Line helpers. Lines are tab-expanded and right-trimmed, so blank lines are empty.

fn normalize(source: &str) -> Vec<String> {
    source
        .lines()
        .map(|line| expand_tabs(line).trim_end().to_string())
        .collect()
}

fn expand_tabs(line: &str) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + 8);
    let mut column = 0;
    for c in line.chars() {
        if c == '\t' {
            let width = 8 - column % 8;
            out.extend(std::iter::repeat_n(' ', width));
            column += width;
        } else {
            out.push(c);
            column += 1;
        }
    }
    out
}

fn indent_of(line: &str) -> usize {
    line.bytes().take_while(|b| *b == b' ').count()
}

fn min_indent(lines: &[String]) -> Option<usize> {
    lines
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| indent_of(l))
        .min()
}

/// The run of blank or indented lines starting at `start`, without trailing blank lines, and the
/// index of the first line after it
fn indented_raw(lines: &[String], start: usize) -> (&[String], usize) {
    let mut end = start;
    while end < lines.len() && (lines[end].is_empty() || indent_of(&lines[end]) > 0) {
        end += 1;
    }
    let mut content_end = end;
    while content_end > start && lines[content_end - 1].is_empty() {
        content_end -= 1;
    }
    (&lines[start..content_end], end)
}

fn dedent(lines: &[String], amount: usize) -> Vec<String> {
    lines
        .iter()
        .map(|l| l[amount.min(indent_of(l))..].to_string())
        .collect()
}

fn dedent_all(lines: &[String]) -> Vec<String> {
    dedent(lines, min_indent(lines).unwrap_or(0))
}

fn adornment_char(line: &str) -> Option<char> {
    let mut chars = line.chars();
    let first = chars.next().filter(char::is_ascii_punctuation)?;
    if line.len() < 2 || !chars.all(|c| c == first) {
        return None;
    }
    Some(first)
}

fn title_at(lines: &[String], i: usize) -> Option<(Item, usize)> {
    let line = &lines[i];
    if let Some(ch) = adornment_char(line) {
        let text = lines.get(i + 1)?;
        let under = lines.get(i + 2)?;
        if text.trim().is_empty() || adornment_char(under) != Some(ch) {
            return None;
        }
        let title = Item::Title {
            style: Adornment { ch, overline: true },
            text: text.trim().to_string(),
        };
        return Some((title, i + 3));
    }

    let under = lines.get(i + 1)?;
    let ch = adornment_char(under)?;
    let width = under.chars().count();
    if width < line.chars().count() && width < 4 {
        return None;
    }
    let title = Item::Title {
        style: Adornment {
            ch,
            overline: false,
        },
        text: line.trim().to_string(),
    };
    Some((title, i + 2))
}

fn is_transition(lines: &[String], i: usize) -> bool {
    adornment_char(&lines[i]).is_some()
        && lines[i].len() >= 4
        && lines.get(i + 1).is_none_or(|l| l.is_empty())
}

fn is_definition_start(lines: &[String], i: usize) -> bool {
    let (Some(line), Some(next)) = (lines.get(i), lines.get(i + 1)) else {
        return false;
    };
    !line.is_empty() && indent_of(line) == 0 && !next.is_empty() && indent_of(next) > 0
}

/// Returns the bullet character and the column where the item text starts
fn bullet_marker(line: &str) -> Option<(char, usize)> {
    let mut chars = line.chars();
    let bullet = chars
        .next()
        .filter(|c| matches!(*c, '*' | '+' | '-' | '\u{2022}' | '\u{2023}' | '\u{2043}'))?;
    let after = chars.as_str();
    if after.is_empty() {
        return Some((bullet, bullet.len_utf8() + 1));
    }
    let text = after.trim_start_matches(' ');
    if text.len() == after.len() {
        return None;
    }
    Some((bullet, line.len() - text.len()))
}

fn ordinal(input: &str) -> IResult<&str, &str> {
    alt((
        digit1,
        tag("#"),
        take_while_m_n(1, 1, |c: char| c.is_ascii_alphabetic()),
    ))
    .parse(input)
}

fn enumerator(line: &str) -> Option<Enumerator> {
    let parsed: IResult<&str, (EnumFormat, &str)> = alt((
        delimited(char('('), ordinal, char(')')).map(|v| (EnumFormat::Parens, v)),
        terminated(ordinal, char('.')).map(|v| (EnumFormat::Period, v)),
        terminated(ordinal, char(')')).map(|v| (EnumFormat::Paren, v)),
    ))
    .parse(line);
    let (after, (format, value)) = parsed.ok()?;

    let text = after.trim_start_matches(' ');
    if text.len() == after.len() || text.is_empty() {
        return None;
    }

    let first = value.chars().next()?;
    let (style, ordinal) = if value == "#" {
        (EnumStyle::Auto, 1)
    } else if first.is_ascii_digit() {
        (EnumStyle::Arabic, value.parse().ok()?)
    } else if first.is_ascii_lowercase() {
        (EnumStyle::LowerAlpha, (first as u8 - b'a') as usize + 1)
    } else {
        (EnumStyle::UpperAlpha, (first as u8 - b'A') as usize + 1)
    };

    Some(Enumerator {
        style,
        format,
        ordinal,
        column: line.len() - text.len(),
    })
}

/// An enumerator only starts a list when the next line ends the item, continues it with
/// indentation, or starts another item of the same kind
fn starts_enumeration(lines: &[String], i: usize, first: &Enumerator) -> bool {
    match lines.get(i + 1) {
        None => true,
        Some(next) if next.is_empty() || indent_of(next) > 0 => true,
        Some(next) => enumerator(next)
            .is_some_and(|e| e.style == first.style && e.format == first.format),
    }
}

/// Parse a `:name: body` field marker
fn field_marker(line: &str) -> Option<(&str, &str)> {
    let result: IResult<&str, (&str, &str)> = separated_pair(
        preceded(char(':'), take_till1(|c: char| c == ':')),
        char(':'),
        alt((preceded(space1, rest), eof)),
    )
    .parse(line);
    result
        .ok()
        .map(|(_, field)| field)
        .filter(|(name, _)| !name.starts_with(' ') && !name.ends_with(' '))
}

/// Parse the `name:: arguments` part of a directive
fn directive_marker(text: &str) -> Option<(&str, &str)> {
    let result: IResult<&str, &str> = terminated(
        take_while1(|c: char| c.is_alphanumeric() || matches!(c, '-' | '_' | '+' | '.')),
        tag("::"),
    )
    .parse(text);
    result.ok().map(|(args, name)| (name, args))
}

fn split_options(body: &[String]) -> (HashMap<String, String>, Vec<String>) {
    let mut options = HashMap::new();
    let mut idx = 0;
    while let Some((key, value)) = body.get(idx).and_then(|l| field_marker(l)) {
        options.insert(key.to_ascii_lowercase(), value.trim().to_string());
        idx += 1;
    }
    while body.get(idx).is_some_and(|l| l.is_empty()) {
        idx += 1;
    }
    (options, body[idx..].to_vec())
}

fn split_target(target: &str) -> Option<(&str, &str)> {
    if let Some(quoted) = target.strip_prefix('`') {
        let end = quoted.find("`:")?;
        return Some((&quoted[..end], &quoted[end + 2..]));
    }
    let end = target.find(':')?;
    Some((&target[..end], &target[end + 1..]))
}

fn join_url(first: &str, rest: &[String]) -> String {
    std::iter::once(first)
        .chain(rest.iter().map(String::as_str))
        .map(str::trim)
        .collect()
}

fn line_block(lines: &[String], mut i: usize) -> (Block, usize) {
    let mut out: Vec<String> = Vec::new();
    while let Some(line) = lines.get(i) {
        if line == "|" {
            out.push(String::new());
        } else if let Some(text) = line.strip_prefix("| ") {
            out.push(text.trim().to_string());
        } else if let (Some(last), true) = (out.last_mut(), indent_of(line) > 0) {
            last.push(' ');
            last.push_str(line.trim());
        } else {
            break;
        }
        i += 1;
    }
    (Block::LineBlock(out), i)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn strip_markup(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '*' | '`')).collect()
}

/// Reference names are case insensitive and whitespace insensitive
fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn is_start_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | ':' | '/' | '\'' | '"' | '<' | '(' | '[' | '{')
}

fn is_end_boundary(c: Option<&char>) -> bool {
    match c {
        None => true,
        Some(c) => {
            c.is_whitespace()
                || matches!(
                    *c,
                    '-' | '.' | ',' | ':' | ';' | '!' | '?' | '\\' | '/' | '\'' | '"' | ')' | ']'
                        | '}' | '>'
                )
        }
    }
}

fn starts_with(chars: &[char], prefix: &str) -> bool {
    let mut idx = 0;
    for p in prefix.chars() {
        if chars.get(idx) != Some(&p) {
            return false;
        }
        idx += 1;
    }
    true
}

/// What follows the closing backquote of interpreted text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reference {
    None,
    Named,
    Anonymous,
}

struct Renderer {
    targets: Targets,
    anonymous_next: usize,
}

impl Renderer {
    fn new(targets: Targets) -> Self {
        Self {
            targets,
            anonymous_next: 0,
        }
    }

    fn render_blocks(&mut self, blocks: &[Block], out: &mut String) {
        for block in blocks {
            self.render_block(block, out);
        }
    }

    fn render_block(&mut self, block: &Block, out: &mut String) {
        match block {
            Block::Section(section) => {
                let h = section.level.min(6);
                out.push_str(&format!("<section id=\"{}\">\n", escape(&section.id)));
                out.push_str(&format!("<h{h}>{}</h{h}>\n", self.inline(&section.title)));
                self.render_blocks(&section.children, out);
                out.push_str("</section>\n");
            }
            Block::Paragraph(text) => {
                out.push_str(&format!("<p>{}</p>\n", self.inline(text)));
            }
            Block::Literal { text, class } => {
                out.push_str(&format!(
                    "<pre class=\"{}\">{}</pre>\n",
                    escape(class),
                    escape(text)
                ));
            }
            Block::BulletList(items) => {
                out.push_str("<ul>\n");
                self.render_items(items, out);
                out.push_str("</ul>\n");
            }
            Block::EnumeratedList {
                style,
                start,
                items,
            } => {
                if *start == 1 {
                    out.push_str(&format!("<ol class=\"{}\">\n", style.class()));
                } else {
                    out.push_str(&format!(
                        "<ol class=\"{}\" start=\"{start}\">\n",
                        style.class()
                    ));
                }
                self.render_items(items, out);
                out.push_str("</ol>\n");
            }
            Block::DefinitionList(items) => {
                out.push_str("<dl>\n");
                self.render_terms(items, out);
                out.push_str("</dl>\n");
            }
            Block::FieldList(items) => {
                out.push_str("<dl class=\"field-list\">\n");
                self.render_terms(items, out);
                out.push_str("</dl>\n");
            }
            Block::BlockQuote {
                children,
                attribution,
            } => {
                out.push_str("<blockquote>\n");
                self.render_blocks(children, out);
                if let Some(attribution) = attribution {
                    out.push_str(&format!(
                        "<p class=\"attribution\">\u{2014}{}</p>\n",
                        self.inline(attribution)
                    ));
                }
                out.push_str("</blockquote>\n");
            }
            Block::LineBlock(lines) => {
                out.push_str("<div class=\"line-block\">\n");
                for line in lines {
                    if line.is_empty() {
                        out.push_str("<div class=\"line\"><br /></div>\n");
                    } else {
                        out.push_str(&format!("<div class=\"line\">{}</div>\n", self.inline(line)));
                    }
                }
                out.push_str("</div>\n");
            }
            Block::Admonition {
                class,
                title,
                children,
            } => {
                out.push_str(&format!("<div class=\"admonition {}\">\n", escape(class)));
                out.push_str(&format!(
                    "<p class=\"admonition-title\">{}</p>\n",
                    self.inline(title)
                ));
                self.render_blocks(children, out);
                out.push_str("</div>\n");
            }
            Block::Image { uri, alt, caption } => {
                let img = format!("<img alt=\"{}\" src=\"{}\" />\n", escape(alt), escape(uri));
                if caption.is_empty() {
                    out.push_str(&img);
                } else {
                    out.push_str("<figure>\n");
                    out.push_str(&img);
                    out.push_str("<figcaption>\n");
                    self.render_blocks(caption, out);
                    out.push_str("</figcaption>\n</figure>\n");
                }
            }
            Block::Raw(html) => {
                out.push_str(html);
                out.push('\n');
            }
            Block::Anchor(id) => {
                out.push_str(&format!("<span id=\"{}\"></span>\n", escape(id)));
            }
            Block::Transition => out.push_str("<hr class=\"docutils\" />\n"),
        }
    }

    fn render_items(&mut self, items: &[Vec<Block>], out: &mut String) {
        for item in items {
            out.push_str("<li>");
            self.render_compact(item, out);
            out.push_str("</li>\n");
        }
    }

    fn render_terms(&mut self, items: &[(String, Vec<Block>)], out: &mut String) {
        for (term, body) in items {
            out.push_str(&format!("<dt>{}</dt>\n<dd>", self.inline(term)));
            self.render_compact(body, out);
            out.push_str("</dd>\n");
        }
    }

    /// A body made of one paragraph is rendered without the `<p>` wrapper
    fn render_compact(&mut self, blocks: &[Block], out: &mut String) {
        match blocks {
            [] => {}
            [Block::Paragraph(text)] => out.push_str(&self.inline(text)),
            _ => {
                out.push('\n');
                self.render_blocks(blocks, out);
            }
        }
    }

    fn inline(&mut self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\\' {
                match chars.get(i + 1) {
                    Some(next) if next.is_whitespace() => {}
                    Some(next) => push_escaped(&mut out, *next),
                    None => {}
                }
                i += 2;
                continue;
            }
            if i == 0 || is_start_boundary(chars[i - 1]) {
                if let Some(next) = self.markup_at(&chars, i, &mut out) {
                    i = next;
                    continue;
                }
            }
            push_escaped(&mut out, c);
            i += 1;
        }
        out
    }

    /// Try to render inline markup starting at `i`, returning the index after it
    fn markup_at(&mut self, chars: &[char], i: usize, out: &mut String) -> Option<usize> {
        let here = &chars[i..];
        if starts_with(here, "``") {
            let (content, end) = find_close(chars, i + 2, "``")?;
            out.push_str(&format!(
                "<span class=\"docutils literal\">{}</span>",
                escape(&content)
            ));
            return Some(end);
        }
        if starts_with(here, "**") {
            let (content, end) = find_close(chars, i + 2, "**")?;
            out.push_str(&format!("<strong>{}</strong>", escape(&unescape(&content))));
            return Some(end);
        }
        match here[0] {
            '*' => {
                let (content, end) = find_close(chars, i + 1, "*")?;
                out.push_str(&format!("<em>{}</em>", escape(&unescape(&content))));
                Some(end)
            }
            '`' => {
                let (content, reference, end) = interpreted(chars, i)?;
                let html = match reference {
                    Reference::None => format!("<cite>{}</cite>", escape(&unescape(&content))),
                    _ => self.reference(&content, reference, true),
                };
                out.push_str(&html);
                Some(end)
            }
            ':' => {
                let mut j = i + 1;
                while j < chars.len()
                    && (chars[j].is_alphanumeric() || matches!(chars[j], '-' | '_' | '.' | '+'))
                {
                    j += 1;
                }
                if j == i + 1 || chars.get(j) != Some(&':') || chars.get(j + 1) != Some(&'`') {
                    return None;
                }
                let role: String = chars[i + 1..j].iter().collect();
                let (content, _, end) = interpreted(chars, j + 1)?;
                out.push_str(&render_role(&role, &content));
                Some(end)
            }
            _ => {
                if let Some((url, end)) = standalone_uri(chars, i) {
                    out.push_str(&format!(
                        "<a class=\"reference external\" href=\"{0}\">{0}</a>",
                        escape(&url)
                    ));
                    return Some(end);
                }
                self.word(chars, i, out)
            }
        }
    }

    /// Consume a whole word, rendering it as a reference when it ends in `_` or `__`
    fn word(&mut self, chars: &[char], i: usize, out: &mut String) -> Option<usize> {
        if !chars[i].is_alphanumeric() {
            return None;
        }
        let mut j = i;
        loop {
            while j < chars.len() && chars[j].is_alphanumeric() {
                j += 1;
            }
            if j + 1 < chars.len()
                && matches!(chars[j], '-' | '_' | '.' | '+')
                && chars[j + 1].is_alphanumeric()
            {
                j += 1;
                continue;
            }
            break;
        }
        let word: String = chars[i..j].iter().collect();

        if starts_with(&chars[j..], "__") && is_end_boundary(chars.get(j + 2)) {
            out.push_str(&self.reference(&word, Reference::Anonymous, false));
            return Some(j + 2);
        }
        if chars.get(j) == Some(&'_') && is_end_boundary(chars.get(j + 1)) {
            out.push_str(&self.reference(&word, Reference::Named, false));
            return Some(j + 1);
        }
        out.push_str(&escape(&word));
        Some(j)
    }

    fn reference(&mut self, content: &str, reference: Reference, embedded: bool) -> String {
        let (text, url) = match content.strip_suffix('>').and_then(|c| c.rsplit_once('<')) {
            Some((text, url)) if embedded => {
                let url: String = url.split_whitespace().collect();
                let text = text.trim();
                let text = if text.is_empty() { url.clone() } else { text.to_string() };
                if reference == Reference::Named {
                    self.targets
                        .named
                        .entry(normalize_name(&text))
                        .or_insert_with(|| url.clone());
                }
                (text, Some(url))
            }
            _ => (content.to_string(), None),
        };

        let href = match (url, reference) {
            (Some(url), _) => url,
            (None, Reference::Anonymous) => {
                let target = self.targets.anonymous.get(self.anonymous_next).cloned();
                self.anonymous_next += 1;
                target.unwrap_or_else(|| format!("#{}", slug(&text)))
            }
            (None, _) => self
                .targets
                .named
                .get(&normalize_name(&text))
                .cloned()
                .unwrap_or_else(|| format!("#{}", slug(&text))),
        };
        let class = if href.starts_with('#') {
            "reference internal"
        } else {
            "reference external"
        };
        format!(
            "<a class=\"{class}\" href=\"{}\">{}</a>",
            escape(&href),
            escape(&unescape(&text))
        )
    }
}

fn render_role(role: &str, content: &str) -> String {
    let text = escape(&unescape(content));
    match role {
        "code" | "literal" => format!("<span class=\"docutils literal\">{}</span>", escape(content)),
        "emphasis" => format!("<em>{text}</em>"),
        "strong" => format!("<strong>{text}</strong>"),
        "sub" | "subscript" => format!("<sub>{text}</sub>"),
        "sup" | "superscript" => format!("<sup>{text}</sup>"),
        "title-reference" | "title" | "t" => format!("<cite>{text}</cite>"),
        other => format!("<span class=\"{}\">{text}</span>", escape(other)),
    }
}

/// Find the end-string `delim` for markup whose content starts at `from`
fn find_close(chars: &[char], from: usize, delim: &str) -> Option<(String, usize)> {
    if chars.get(from).is_none_or(|c| c.is_whitespace()) {
        return None;
    }
    let width = delim.chars().count();
    let mut j = from + 1;
    while j + width <= chars.len() {
        if starts_with(&chars[j..], delim)
            && !chars[j - 1].is_whitespace()
            && is_end_boundary(chars.get(j + width))
        {
            return Some((chars[from..j].iter().collect(), j + width));
        }
        j += 1;
    }
    None
}

/// Parse interpreted text opening at the backquote at `i`, including a trailing `_` or `__`
fn interpreted(chars: &[char], i: usize) -> Option<(String, Reference, usize)> {
    if chars
        .get(i + 1)
        .is_none_or(|c| c.is_whitespace() || *c == '`')
    {
        return None;
    }
    let mut j = i + 2;
    while j < chars.len() {
        if chars[j] == '`' && !chars[j - 1].is_whitespace() {
            let after = j + 1;
            let (reference, end) = if starts_with(&chars[after..], "__") {
                (Reference::Anonymous, after + 2)
            } else if chars.get(after) == Some(&'_') {
                (Reference::Named, after + 1)
            } else {
                (Reference::None, after)
            };
            if is_end_boundary(chars.get(end)) {
                return Some((chars[i + 1..j].iter().collect(), reference, end));
            }
        }
        j += 1;
    }
    None
}

fn standalone_uri(chars: &[char], i: usize) -> Option<(String, usize)> {
    let here = &chars[i..];
    let scheme = URI_SCHEMES.iter().find(|s| starts_with(here, s))?;
    let mut end = i;
    while end < chars.len() && !chars[end].is_whitespace() && !matches!(chars[end], '<' | '>' | '"')
    {
        end += 1;
    }
    while end > i && matches!(chars[end - 1], '.' | ',' | ';' | ':' | '!' | '?' | ')' | '\'') {
        end -= 1;
    }
    if end - i <= scheme.len() {
        return None;
    }
    Some((chars[i..end].iter().collect(), end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_section_is_promoted_to_title() {
        let html = to_html("Title\n=====\n\nBody text.\n");
        assert_eq!(
            html,
            "<main>\n<h1 class=\"title\">Title</h1>\n<p>Body text.</p>\n</main>\n"
        );
    }

    #[test]
    fn subsections_nest_below_the_title() {
        let html = to_html(
            "=====\nGuide\n=====\n\nIntro.\n\nInstall\n-------\n\nRun it.\n\nUsage\n-------\n\nUse it.\n",
        );
        assert!(html.starts_with("<main>\n<h1 class=\"title\">Guide</h1>\n<p>Intro.</p>\n"));
        assert!(html.contains("<section id=\"install\">\n<h2>Install</h2>\n<p>Run it.</p>\n</section>\n"));
        assert!(html.contains("<section id=\"usage\">\n<h2>Usage</h2>\n"));
    }

    #[test]
    fn sibling_top_level_sections_are_not_promoted() {
        let html = to_html("One\n===\n\nFirst.\n\nTwo\n===\n\nSecond.\n");
        assert!(!html.contains("class=\"title\""));
        assert!(html.contains("<section id=\"one\">\n<h1>One</h1>"));
        assert!(html.contains("<section id=\"two\">\n<h1>Two</h1>"));
    }

    #[test]
    fn duplicate_section_ids_are_made_unique() {
        let html = to_html("A\n==\n\nNotes\n-----\n\nx\n\nB\n==\n\nNotes\n-----\n\ny\n");
        assert!(html.contains("id=\"notes\""));
        assert!(html.contains("id=\"notes-1\""));
    }

    #[test]
    fn inline_markup() {
        let html = to_html(
            "Some *em*, **strong**, ``a < b`` and `title` text. Escaped \\*star\\*. 2*3*4.\n",
        );
        assert!(html.contains("<em>em</em>"), "{html}");
        assert!(html.contains("<strong>strong</strong>"), "{html}");
        assert!(
            html.contains("<span class=\"docutils literal\">a &lt; b</span>"),
            "{html}"
        );
        assert!(html.contains("<cite>title</cite>"), "{html}");
        assert!(html.contains("Escaped *star*."), "{html}");
        assert!(html.contains("2*3*4."), "{html}");
    }

    #[test]
    fn roles() {
        let html = to_html("Use :code:`x = 1` and H\\ :sub:`2`\\ O.\n");
        assert!(html.contains("<span class=\"docutils literal\">x = 1</span>"), "{html}");
        assert!(html.contains("H<sub>2</sub>O."), "{html}");
    }

    #[test]
    fn hyperlinks() {
        let html = to_html(
            "See `Rust <https://www.rust-lang.org/>`_, docs_ and `the book`__.\n\
             Also https://example.com/path.\n\n\
             .. _docs: https://docs.rs\n\
             .. __: https://doc.rust-lang.org/book/\n",
        );
        assert!(
            html.contains(
                "<a class=\"reference external\" href=\"https://www.rust-lang.org/\">Rust</a>"
            ),
            "{html}"
        );
        assert!(
            html.contains("<a class=\"reference external\" href=\"https://docs.rs\">docs</a>"),
            "{html}"
        );
        assert!(
            html.contains(
                "<a class=\"reference external\" href=\"https://doc.rust-lang.org/book/\">the book</a>"
            ),
            "{html}"
        );
        assert!(
            html.contains(
                "<a class=\"reference external\" href=\"https://example.com/path\">https://example.com/path</a>."
            ),
            "{html}"
        );
    }

    #[test]
    fn references_to_sections_are_internal() {
        let html = to_html("Intro\n=====\n\nJump to `Next Steps`_.\n\nNext Steps\n----------\n\nDone.\n");
        assert!(
            html.contains("<a class=\"reference internal\" href=\"#next-steps\">Next Steps</a>"),
            "{html}"
        );
    }

    #[test]
    fn lists() {
        let html = to_html(
            "- one\n- two\n  continued\n\n3. three\n4. four\n\n#. auto\n#. again\n",
        );
        assert!(
            html.contains("<ul>\n<li>one</li>\n<li>two\ncontinued</li>\n</ul>\n"),
            "{html}"
        );
        assert!(
            html.contains("<ol class=\"arabic\" start=\"3\">\n<li>three</li>\n<li>four</li>\n</ol>\n"),
            "{html}"
        );
        assert!(
            html.contains("<ol class=\"arabic\">\n<li>auto</li>\n<li>again</li>\n</ol>\n"),
            "{html}"
        );
    }

    #[test]
    fn nested_list_items_render_blocks() {
        let html = to_html("* outer\n\n  * inner\n");
        assert!(
            html.contains("<ul>\n<li>\n<p>outer</p>\n<ul>\n<li>inner</li>\n</ul>\n</li>\n</ul>\n"),
            "{html}"
        );
    }

    #[test]
    fn lone_enumerator_in_a_paragraph_is_text() {
        let html = to_html("A. Smith wrote\nthis line.\n");
        assert!(html.contains("<p>A. Smith wrote\nthis line.</p>"), "{html}");
    }

    #[test]
    fn literal_blocks() {
        let html = to_html("Example::\n\n    fn main() {\n        println!(\"<hi>\");\n    }\n\nAfter.\n");
        assert!(html.contains("<p>Example:</p>"), "{html}");
        assert!(
            html.contains(
                "<pre class=\"literal-block\">fn main() {\n    println!(&quot;&lt;hi&gt;&quot;);\n}</pre>"
            ),
            "{html}"
        );
        assert!(html.contains("<p>After.</p>"), "{html}");

        let html = to_html("Expanded ::\n\n  code\n");
        assert!(html.contains("<p>Expanded</p>"), "{html}");

        let html = to_html("::\n\n  only code\n");
        assert!(!html.contains("<p>"), "{html}");
        assert!(html.contains("only code"), "{html}");
    }

    #[test]
    fn code_directive_keeps_language() {
        let html = to_html(".. code-block:: rust\n   :linenos:\n\n   let x = 1;\n");
        assert!(
            html.contains("<pre class=\"code rust literal-block\">let x = 1;</pre>"),
            "{html}"
        );
    }

    #[test]
    fn admonitions() {
        let html = to_html(".. note:: Read this\n   carefully.\n\n.. warning::\n\n   Hot.\n");
        assert!(
            html.contains(
                "<div class=\"admonition note\">\n<p class=\"admonition-title\">Note</p>\n<p>Read this\ncarefully.</p>\n</div>\n"
            ),
            "{html}"
        );
        assert!(html.contains("<div class=\"admonition warning\">"), "{html}");
        assert!(html.contains("<p>Hot.</p>"), "{html}");
    }

    #[test]
    fn images_and_raw_html() {
        let html = to_html(
            ".. image:: logo.png\n   :alt: The logo\n\n.. raw:: html\n\n   <div class=\"x\"></div>\n",
        );
        assert!(html.contains("<img alt=\"The logo\" src=\"logo.png\" />"), "{html}");
        assert!(html.contains("<div class=\"x\"></div>\n"), "{html}");
    }

    #[test]
    fn comments_and_unknown_directives_are_dropped() {
        let html = to_html(".. a comment\n   spanning lines\n\n.. contents::\n\nVisible.\n");
        assert_eq!(html, "<main>\n<p>Visible.</p>\n</main>\n");
    }

    #[test]
    fn definition_and_field_lists() {
        let html = to_html("term\n    The definition.\n\n:Author: Someone\n:Version: 1.0\n");
        assert!(
            html.contains("<dl>\n<dt>term</dt>\n<dd>The definition.</dd>\n</dl>\n"),
            "{html}"
        );
        assert!(
            html.contains(
                "<dl class=\"field-list\">\n<dt>Author</dt>\n<dd>Someone</dd>\n<dt>Version</dt>\n<dd>1.0</dd>\n</dl>\n"
            ),
            "{html}"
        );
    }

    #[test]
    fn block_quote_with_attribution() {
        let html = to_html("Intro.\n\n    Quoted text.\n\n    -- Someone Famous\n");
        assert!(
            html.contains(
                "<blockquote>\n<p>Quoted text.</p>\n<p class=\"attribution\">\u{2014}Someone Famous</p>\n</blockquote>\n"
            ),
            "{html}"
        );
    }

    #[test]
    fn transitions_line_blocks_and_doctests() {
        let html = to_html("Above.\n\n----\n\nBelow.\n\n| line one\n| line two\n\n>>> 1 + 1\n2\n");
        assert!(html.contains("<hr class=\"docutils\" />"), "{html}");
        assert!(
            html.contains(
                "<div class=\"line-block\">\n<div class=\"line\">line one</div>\n<div class=\"line\">line two</div>\n</div>\n"
            ),
            "{html}"
        );
        assert!(
            html.contains("<pre class=\"code python doctest\">&gt;&gt;&gt; 1 + 1\n2</pre>"),
            "{html}"
        );
    }

    #[test]
    fn text_is_escaped() {
        let html = to_html("Fish & chips <b>\"quoted\"</b>\n");
        assert!(
            html.contains("<p>Fish &amp; chips &lt;b&gt;&quot;quoted&quot;&lt;/b&gt;</p>"),
            "{html}"
        );
    }

    #[test]
    fn empty_document() {
        assert_eq!(to_html(""), "<main>\n</main>\n");
    }
}
