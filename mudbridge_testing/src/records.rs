//! Builders for inbound wire text.

use serde_json::{Map, Value, json};

/// One newline-terminated command record.
///
/// ```
/// use mudbridge_testing::command_line;
///
/// assert_eq!(
///     command_line("roll", "3d6", "#12"),
///     "{\"data\":\"3d6\",\"path\":\"roll\",\"requester\":\"#12\",\"type\":\"command\"}\n"
/// );
/// ```
pub fn command_line(path: &str, data: &str, requester: &str) -> String {
    let record = json!({
        "type": "command",
        "path": path,
        "data": data,
        "requester": requester,
    });
    format!("{record}\n")
}

/// One newline-terminated process reply for `pid` carrying `fields`.
pub fn process_line<'a, I>(pid: u32, fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    let mut record = Map::new();
    record.insert("type".to_owned(), json!("process"));
    record.insert("pid".to_owned(), json!(pid));
    for (key, value) in fields {
        record.insert(key.to_owned(), value);
    }
    format!("{}\n", Value::Object(record))
}

/// Split `text` into chunks of at most `size` bytes without breaking
/// characters.
///
/// # Panics
///
/// Panics if `size` is zero.
pub fn chunks_of(text: &str, size: usize) -> Vec<String> {
    assert!(size > 0, "chunk size must be positive");
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if current.len() + c.len_utf8() > size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split `text` at each byte offset in `points`, ignoring offsets that are
/// out of range or not on a character boundary.
pub fn split_at_points(text: &str, points: &[usize]) -> Vec<String> {
    let mut cuts: Vec<usize> = points
        .iter()
        .copied()
        .filter(|&point| point > 0 && point < text.len() && text.is_char_boundary(point))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(text.len())) {
        pieces.push(text[start..cut].to_owned());
        start = cut;
    }
    pieces
}
