use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use syntect::highlighting::ThemeSet;
use syntect::html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

use crate::error::{Error, Result};

static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);
static NEW_FILE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\+\+\+ b/(.+?)\r?$").expect("static regex"));

const THEME: &str = "InspiredGitHub";
const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "sc-" };

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDiff {
    pub files: Vec<String>,
    pub html: String,
}

/// Paths of changed files, in order of appearance, from `+++ b/<path>` headers.
pub fn changed_files(patch: &str) -> Vec<String> {
    NEW_FILE_HEADER
        .captures_iter(patch)
        .map(|c| c[1].to_string())
        .collect()
}

/// Highlight a unified diff as an HTML fragment. All patch text is escaped.
pub fn highlight(patch: &str) -> Result<String> {
    let syntax = SYNTAX_SET
        .find_syntax_by_extension("diff")
        .unwrap_or_else(|| SYNTAX_SET.find_syntax_plain_text());

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAX_SET, CLASS_STYLE);
    for line in LinesWithEndings::from(patch) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|e| Error::Render(format!("failed to highlight diff: {e}")))?;
    }

    Ok(format!(
        "<div class=\"highlight\"><pre>{}</pre></div>",
        generator.finalize()
    ))
}

pub fn render(patch: &str) -> Result<RenderedDiff> {
    Ok(RenderedDiff {
        files: changed_files(patch),
        html: highlight(patch)?,
    })
}

/// CSS for the class names emitted by [`highlight`].
pub fn stylesheet() -> Result<String> {
    let theme = THEME_SET
        .themes
        .get(THEME)
        .ok_or_else(|| Error::Render(format!("theme {THEME} not bundled")))?;
    css_for_theme_with_class_style(theme, CLASS_STYLE)
        .map_err(|e| Error::Render(format!("failed to build stylesheet: {e}")))
}
