use std::sync::LazyLock;

use comrak::{
    Options,
    options::{Extension, Render},
};

static RENDER_OPTIONS: LazyLock<Options<'static>> = LazyLock::new(|| Options {
    extension: Extension {
        strikethrough: true,
        table: true,
        autolink: true,
        footnotes: true,
        ..Default::default()
    },
    // Raw HTML in a document is passed through untouched
    render: Render {
        r#unsafe: true,
        ..Default::default()
    },
    ..Default::default()
});

/// Render a markdown document body to an HTML fragment
pub fn to_html(body: &str) -> String {
    comrak::markdown_to_html(body, &RENDER_OPTIONS)
}
