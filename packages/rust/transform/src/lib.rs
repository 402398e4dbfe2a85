//! Chapter cleanup: turns a raw reddit chapter into a tidy Markdown chapter.
//!
//! [`ChapterCleanup`] is the [`Transformer`] the processed store is filled
//! with. It runs a series of line passes (navigation links, scene
//! delimiters, zero-width padding), then lays the chapter out as:
//!
//! ```text
//! # Chapter 2 – Shore Leave
//!
//! **Date**: `2023-11-14 Tuesday`
//!
//! > author note found above the heading
//!
//! -----
//!
//! chapter body
//! ```

mod cleanup;

use tracing::{debug, instrument};

use chaptersync_shared::{Result, SyncError, TransformContext, Transformer};

use cleanup::{DELIMITER, TitleLine};

/// `strftime` pattern of the date line.
const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %A";

// ---------------------------------------------------------------------------
// ChapterCleanup
// ---------------------------------------------------------------------------

/// The standard chapter transformer.
#[derive(Debug, Clone)]
pub struct ChapterCleanup {
    /// Pattern used to render the revision in the date line.
    pub date_format: String,
}

impl Default for ChapterCleanup {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

impl Transformer for ChapterCleanup {
    #[instrument(skip_all, fields(file = %ctx.filename))]
    fn transform(&self, text: &str, ctx: &TransformContext) -> Result<String> {
        if text.trim().is_empty() {
            return Err(SyncError::transform(&ctx.filename, "chapter text is empty"));
        }

        let cleaned = cleanup::run_pipeline(text);
        let lines: Vec<&str> = cleaned.lines().collect();

        let (title, found) = match cleanup::find_title(&lines) {
            Some(title) => (title, true),
            None => (fallback_title(&lines, ctx)?, false),
        };
        debug!(heading = %title.heading, line = title.index, found, "chapter heading located");

        // A fallback heading is inserted, not found, so no source line is consumed.
        let before = &lines[..title.index];
        let after = if found {
            &lines[title.index + 1..]
        } else {
            &lines[title.index..]
        };

        let date = format!("**Date**: `{}`", ctx.revision.format(&self.date_format));
        let output = layout(&title.heading, &date, before, after);

        Ok(cleanup::ensure_trailing_newline(
            &cleanup::normalize_whitespace(&output),
        ))
    }
}

/// Heading used when the text carries none: the record's title, else the
/// title embedded in its file name. It goes right before the first scene
/// delimiter, so whatever precedes that delimiter reads as an author note.
fn fallback_title(lines: &[&str], ctx: &TransformContext) -> Result<TitleLine> {
    let title = ctx
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| cleanup::title_from_filename(&ctx.filename))
        .ok_or_else(|| SyncError::transform(&ctx.filename, "no chapter title found"))?;

    let index = lines
        .iter()
        .position(|l| cleanup::is_delimiter(l))
        .unwrap_or(0);

    Ok(TitleLine {
        index,
        heading: format!("# {}", title.replace('*', "")),
    })
}

/// Assemble heading, date, author notes and body.
///
/// `before` holds the lines that preceded the heading. Everything up to the
/// first delimiter among them is an author note; the rest belongs to the body.
fn layout(heading: &str, date: &str, before: &[&str], after: &[&str]) -> String {
    let notes_end = before
        .iter()
        .position(|l| cleanup::is_delimiter(l))
        .unwrap_or(before.len());
    let notes = trim_blank(&before[..notes_end]);

    let mut body: Vec<&str> = before[notes_end..].to_vec();
    body.extend_from_slice(after);
    let body = trim_delimiters(&body);

    let mut out = vec![heading.to_string(), String::new(), date.to_string(), String::new()];

    if !notes.is_empty() {
        for line in notes {
            if line.trim().is_empty() {
                out.push(">".to_string());
            } else {
                out.push(format!("> {}", line.trim_end()));
            }
        }
        out.push(String::new());
        out.push(DELIMITER.to_string());
        out.push(String::new());
    }

    out.extend(body.iter().map(|l| l.to_string()));
    out.join("\n")
}

/// Strip leading and trailing blank lines.
fn trim_blank<'a, 'b>(lines: &'a [&'b str]) -> &'a [&'b str] {
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(start, |i| i + 1);
    &lines[start..end.max(start)]
}

/// Strip leading and trailing blank or delimiter lines.
fn trim_delimiters<'a, 'b>(lines: &'a [&'b str]) -> &'a [&'b str] {
    let keep = |l: &&str| !l.trim().is_empty() && !cleanup::is_delimiter(l);
    let start = lines.iter().position(keep).unwrap_or(lines.len());
    let end = lines.iter().rposition(keep).map_or(start, |i| i + 1);
    &lines[start..end.max(start)]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chaptersync_shared::Revision;

    fn ctx(filename: &str, title: Option<&str>) -> TransformContext {
        TransformContext {
            url: "https://www.reddit.com/r/HFY/comments/bbb222/chapter_2/".into(),
            filename: filename.into(),
            title: title.map(str::to_string),
            revision: Revision(1700003600),
        }
    }

    fn fixture_text() -> String {
        let raw = std::fs::read_to_string("../../../fixtures/reddit/thread.json")
            .expect("read thread fixture");
        let thread: serde_json::Value = serde_json::from_str(&raw).expect("parse fixture");
        let selftext = thread[0]["data"]["children"][0]["data"]["selftext"]
            .as_str()
            .expect("selftext")
            .to_string();
        let reply = thread[1]["data"]["children"][1]["data"]["body"]
            .as_str()
            .expect("reply body");
        format!("{selftext}\n\n-----\n\n{reply}")
    }

    #[test]
    fn cleans_fixture_chapter() {
        let out = ChapterCleanup::default()
            .transform(&fixture_text(), &ctx("1700003600 - bbb222 - [Ch 2].md", None))
            .unwrap();

        let expected = "\
# Chapter 2 – Shore Leave

**Date**: `2023-11-14 Tuesday`

> Thanks to everyone reading along, this one took a while.

-----

The ship docked at Kestrel Station a little after shift change.

-----

Later that day, the crew found the only bar that served humans.

-----

The bar was loud, and the drinks were louder.

To be continued.
";
        assert_eq!(out, expected);
    }

    #[test]
    fn heading_on_first_line_has_no_notes() {
        let text = "# Chapter 4 – Dust\n\nIt was dry.\n\n---\n\nVery dry.";
        let out = ChapterCleanup::default()
            .transform(text, &ctx("x.md", None))
            .unwrap();
        assert_eq!(
            out,
            "# Chapter 4 – Dust\n\n**Date**: `2023-11-14 Tuesday`\n\nIt was dry.\n\n-----\n\nVery dry.\n"
        );
    }

    #[test]
    fn falls_back_to_record_title_before_first_delimiter() {
        let text = "Sorry for the delay!\n\n---\n\nThe story goes on.";
        let out = ChapterCleanup::default()
            .transform(text, &ctx("x.md", Some("Interlude: **Home**")))
            .unwrap();
        assert!(out.starts_with("# Interlude: Home\n\n**Date**"));
        assert!(out.contains("> Sorry for the delay!\n\n-----\n\nThe story goes on.\n"));
    }

    #[test]
    fn falls_back_to_filename_title() {
        let text = "No heading anywhere.";
        let out = ChapterCleanup::default()
            .transform(text, &ctx("1 - a - [Chapter one].md", None))
            .unwrap();
        assert!(out.starts_with("# Chapter one\n"));
        assert!(out.ends_with("No heading anywhere.\n"));
    }

    #[test]
    fn empty_text_is_a_transform_error() {
        let err = ChapterCleanup::default()
            .transform("  \n ", &ctx("x.md", None))
            .unwrap_err();
        assert!(matches!(err, SyncError::Transform { .. }));
    }

    #[test]
    fn missing_title_is_a_transform_error() {
        let err = ChapterCleanup::default()
            .transform("Just prose.", &ctx("notes.md", None))
            .unwrap_err();
        assert!(err.to_string().contains("no chapter title"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn output_is_stable_under_reprocessing_inputs() {
        let cleanup = ChapterCleanup::default();
        let c = ctx("x.md", None);
        let a = cleanup.transform(&fixture_text(), &c).unwrap();
        let b = cleanup.transform(&fixture_text(), &c).unwrap();
        assert_eq!(a, b);
    }
}
