//! Cleanup passes for raw chapter text.
//!
//! The line-level passes are functions `&str -> String` applied in sequence.
//! Title detection and layout work on the cleaned lines afterwards.

use std::sync::LazyLock;

use regex::Regex;

/// Canonical scene delimiter.
pub(crate) const DELIMITER: &str = "-----";

/// Run the line-level passes on raw chapter text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = normalize_line_endings(text);

    result = strip_navigation(&result);
    result = normalize_delimiters(&result);
    result = drop_padding(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Navigation links
// ---------------------------------------------------------------------------

/// Remove previous/next chapter links, and the line holding them if nothing
/// else is left on it.
///
/// Navigation links are either written with escaped brackets
/// (`[\[Next Chapter\]](..)`) or named after the direction they point in.
fn strip_navigation(text: &str) -> String {
    static NAV_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\[\s*\\\[.*?\\\]\s*\]\([^)]*\)|\[\s*(?:previous|prev|next|first|last)(?:\s+(?:chapter|part))?\s*\]\([^)]*\)",
        )
        .expect("valid regex")
    });

    let mut lines = Vec::new();
    for line in text.lines() {
        if !NAV_LINK_RE.is_match(line) {
            lines.push(line.to_string());
            continue;
        }
        let rest = NAV_LINK_RE.replace_all(line, "");
        let leftover = rest.trim_matches(|c: char| c.is_whitespace() || matches!(c, '|' | '/' | '•'));
        if !leftover.is_empty() {
            lines.push(rest.trim_end().to_string());
        }
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Scene delimiters
// ---------------------------------------------------------------------------

/// Rewrite every thematic break (`---`, `\-\-\-`, `***`, `* * *`) as `-----`.
fn normalize_delimiters(text: &str) -> String {
    text.lines()
        .map(|line| {
            if is_delimiter(line) {
                DELIMITER.to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn is_delimiter(line: &str) -> bool {
    static DELIM_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:\\?-){3,}$|^(?:\*\s*){3,}$|^(?:_\s*){3,}$").expect("valid regex")
    });
    DELIM_RE.is_match(line.trim())
}

// ---------------------------------------------------------------------------
// Pass 4: Zero-width padding
// ---------------------------------------------------------------------------

/// Drop lines that only hold zero-width spaces (literal or as an entity).
fn drop_padding(text: &str) -> String {
    static PADDING_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(?:\s|&#x200[Bb];|&#8203;|\u{200B})+$").expect("valid regex")
    });

    text.lines()
        .filter(|line| line.trim().is_empty() || !PADDING_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Title detection
// ---------------------------------------------------------------------------

/// Position and normalized form of the chapter heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TitleLine {
    pub index: usize,
    pub heading: String,
}

/// Find the first line that reads like a chapter heading.
pub(crate) fn find_title(lines: &[&str]) -> Option<TitleLine> {
    static WITH_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(?:#+\s*)?[*_]*\s*chapter\s+([\d/ AB]+?)\s+[–—-]\s+(.+?)\s*[*_]*$")
            .expect("valid regex")
    });
    static NUMBER_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(?:#+\s*)?[*_]*\s*chapter\s+([\d/]+)\s*[*_]*$").expect("valid regex")
    });

    lines.iter().enumerate().find_map(|(index, line)| {
        let line = line.trim();
        if let Some(caps) = WITH_TITLE_RE.captures(line) {
            let number = caps[1].trim();
            let title = caps[2].replace('*', "");
            return Some(TitleLine {
                index,
                heading: format!("# Chapter {number} – {}", title.trim()),
            });
        }
        NUMBER_ONLY_RE.captures(line).map(|caps| TitleLine {
            index,
            heading: format!("# Chapter {}", &caps[1]),
        })
    })
}

/// Title embedded in a chapter file name (`... - [Title].md`).
pub(crate) fn title_from_filename(filename: &str) -> Option<String> {
    static FILENAME_TITLE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[(.+)\]\.md$").expect("valid regex"));

    FILENAME_TITLE_RE
        .captures(filename)
        .map(|caps| caps[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Final passes
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into one and trim trailing whitespace.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let trimmed = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    MULTI_BLANK_RE.replace_all(&trimmed, "\n\n").to_string()
}

/// Ensure the text ends with exactly one newline.
pub(crate) fn ensure_trailing_newline(text: &str) -> String {
    let trimmed = text.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
