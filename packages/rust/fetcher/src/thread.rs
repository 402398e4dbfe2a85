//! Submission thread decoding.
//!
//! A reddit thread as served by `<permalink>.json` is a two-element array:
//! the listing holding the submission (`t3`) and the listing holding its
//! top-level comments (`t1`). A serialized chapter is the submission text
//! followed by the author's own continuation replies, each one a reply to
//! the previous.

use serde_json::Value;

use chaptersync_shared::{FetchedChapter, Revision};

/// Separator placed between the submission text and each continuation.
pub const PART_SEPARATOR: &str = "\n\n-----\n\n";

/// Author name reddit substitutes for removed accounts.
const DELETED_AUTHOR: &str = "[deleted]";

/// Decode a thread document into a chapter.
///
/// Returns a human-readable reason when the document has no submission.
pub fn extract_chapter(thread: &Value) -> Result<FetchedChapter, String> {
    let listings = thread
        .as_array()
        .ok_or_else(|| "thread document is not an array".to_string())?;

    let submission = listings
        .first()
        .and_then(children)
        .and_then(|c| c.iter().find(|t| kind(t) == Some("t3")))
        .map(|t| &t["data"])
        .ok_or_else(|| "thread document holds no submission".to_string())?;

    let id = str_field(submission, "id").ok_or("submission has no id")?;
    let title = str_field(submission, "title").ok_or("submission has no title")?;
    let created = submission["created_utc"]
        .as_f64()
        .ok_or("submission has no created_utc")?;
    let selftext = str_field(submission, "selftext").unwrap_or_default();
    let author = str_field(submission, "author").unwrap_or(DELETED_AUTHOR);

    let comments = listings.get(1).and_then(children).map(Vec::as_slice).unwrap_or(&[]);
    let chain = if author == DELETED_AUTHOR {
        Vec::new()
    } else {
        op_chain(comments, author)
    };

    let revision = chain
        .last()
        .and_then(|c| c["created_utc"].as_f64())
        .map(Revision::from_unix_f64)
        .unwrap_or_else(|| Revision::from_unix_f64(created));

    let mut parts = vec![selftext];
    parts.extend(chain.iter().filter_map(|c| str_field(c, "body")));

    Ok(FetchedChapter {
        id: id.to_string(),
        revision,
        title: title.trim().to_string(),
        text: parts.join(PART_SEPARATOR),
    })
}

/// Follow the author's reply chain: the first comment by `author` at each
/// level, descending into its replies.
fn op_chain<'a>(top_level: &'a [Value], author: &str) -> Vec<&'a Value> {
    let mut chain = Vec::new();
    let mut level = top_level;

    while let Some(comment) = level
        .iter()
        .filter(|t| kind(t) == Some("t1"))
        .map(|t| &t["data"])
        .find(|c| str_field(c, "author") == Some(author))
    {
        chain.push(comment);
        // `replies` is an empty string when there are none.
        level = children(&comment["replies"]).map(Vec::as_slice).unwrap_or(&[]);
    }
    chain
}

fn children(listing: &Value) -> Option<&Vec<Value>> {
    listing["data"]["children"].as_array()
}

fn kind(thing: &Value) -> Option<&str> {
    thing["kind"].as_str()
}

fn str_field<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data[field].as_str()
}
