//! Wiki page section parser.
//!
//! A story's wiki page is free-form Markdown. The chapter listing is the set
//! of links found after the heading whose text equals the configured section
//! name (case-insensitive, emphasis ignored), up to the next heading:
//!
//! ```text
//! ## **A Job for a Deathworlder**
//! * [Chapter 1](https://www.reddit.com/r/HFY/comments/abc/chapter_1/)
//! * [Chapter 2](https://www.reddit.com/r/HFY/comments/def/chapter_2/)
//! ## Other stories
//! ```

use std::sync::LazyLock;

use regex::Regex;

use chaptersync_shared::{ManifestChapter, Result, SyncError};

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `#Heading` written without the space Markdown requires.
static TIGHT_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([ \t]*)(#{1,6})([^\s#])").expect("tight heading regex"));

/// Matches an ATX heading, capturing its text without closing hashes.
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*#{1,6}\s+(.*?)\s*#*\s*$").expect("heading regex")
});

/// Matches an inline link `[text](url)`.
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\(\s*<?([^)\s>]+)>?(?:\s+[^)]*)?\)").expect("link regex")
});

/// Characters most file systems refuse in a file name.
static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("unsafe chars regex"));

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Collect the chapter links listed under `section` in `content_md`.
///
/// Fails if no link is found under a matching heading.
pub fn parse_section(content_md: &str, section: &str) -> Result<Vec<ManifestChapter>> {
    let wanted = section.trim().to_lowercase();
    let content = TIGHT_HEADING_RE.replace_all(content_md, "${1}${2} ${3}");

    let mut in_section = false;
    let mut chapters = Vec::new();

    for line in content.lines() {
        if let Some(caps) = HEADING_RE.captures(line) {
            in_section = strip_emphasis(&caps[1]).trim().to_lowercase() == wanted;
            continue;
        }
        if !in_section {
            continue;
        }
        for caps in LINK_RE.captures_iter(line) {
            let title = sanitize_link_text(strip_emphasis(&caps[1]).trim());
            chapters.push(ManifestChapter {
                url: caps[2].trim().to_string(),
                title,
            });
        }
    }

    if chapters.is_empty() {
        return Err(SyncError::parse(format!(
            "no chapters found in wiki section '{section}'"
        )));
    }
    Ok(chapters)
}

/// Replace characters unsupported by most file systems with `_`.
pub fn sanitize_link_text(text: &str) -> String {
    UNSAFE_CHARS_RE.replace_all(text, "_").into_owned()
}

fn strip_emphasis(text: &str) -> String {
    text.replace(['*', '_'], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "\
#Stories by the author

Some intro text with a [profile link](https://www.reddit.com/user/someone).

## **A Job for a Deathworlder**

* [Chapter 1](https://www.reddit.com/r/HFY/comments/aaa111/chapter_1/)
* [Chapter 2: Tea/Coffee?](https://www.reddit.com/r/HFY/comments/bbb222/chapter_2/)
* [Chapter 3](https://www.reddit.com/r/HFY/comments/ccc333/chapter_3/) and [Chapter 4](https://www.reddit.com/r/HFY/comments/ddd444/chapter_4/)

##Other series

* [Unrelated](https://www.reddit.com/r/HFY/comments/zzz999/unrelated/)
";

    #[test]
    fn collects_links_under_matching_heading() {
        let chapters = parse_section(PAGE, "A Job for a Deathworlder").unwrap();
        assert_eq!(chapters.len(), 4);
        assert_eq!(chapters[0].title, "Chapter 1");
        assert_eq!(
            chapters[0].url,
            "https://www.reddit.com/r/HFY/comments/aaa111/chapter_1/"
        );
        assert_eq!(chapters[3].title, "Chapter 4");
    }

    #[test]
    fn section_match_is_case_insensitive() {
        let chapters = parse_section(PAGE, "  a job FOR a deathworlder ").unwrap();
        assert_eq!(chapters.len(), 4);
    }

    #[test]
    fn tight_headings_are_recognized() {
        let chapters = parse_section(PAGE, "Other series").unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Unrelated");
    }

    #[test]
    fn link_titles_are_sanitized() {
        let chapters = parse_section(PAGE, "A Job for a Deathworlder").unwrap();
        assert_eq!(chapters[1].title, "Chapter 2_ Tea_Coffee_");
    }

    #[test]
    fn section_ends_at_next_heading() {
        let chapters = parse_section(PAGE, "Stories by the author").unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "profile link");
    }

    #[test]
    fn links_before_any_heading_are_ignored() {
        let page = "[Stray](https://example.com/a)\n\n# Listing\n\nno links here\n";
        let err = parse_section(page, "Listing").unwrap_err();
        assert!(err.to_string().contains("no chapters"));
    }

    #[test]
    fn missing_section_fails() {
        assert!(parse_section(PAGE, "Nonexistent").is_err());
        assert!(parse_section("", "Anything").is_err());
    }
}
