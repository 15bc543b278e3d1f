//! Failure rendering for expected/actual comparison.
//!
//! Expected strings in compiler tests are short, so failures show both sides in
//! full rather than a diff hunk.

const RULE: &str = "================================================";

/// Render expected and actual text in full, one after the other.
#[must_use]
pub fn render_full(expected: &str, actual: &str) -> String {
    let mut out = String::new();
    out.push_str("\n========= Expected this output: =========\n");
    out.push_str(expected);
    out.push('\n');
    out.push_str(RULE);
    out.push('\n');
    out.push_str(actual);
    out.push('\n');
    if let Some(at) = first_difference(expected, actual) {
        out.push_str(&format!("(first difference at byte {at})\n"));
    }
    out
}

/// Render an expected list next to the text it was searched in.
#[must_use]
pub fn render_list(heading: &str, expected: &[String], actual: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n========= {heading}: =========\n"));
    for item in expected {
        out.push_str(item);
        out.push('\n');
    }
    out.push_str(RULE);
    out.push('\n');
    out.push_str(actual);
    out.push('\n');
    out
}

/// Byte offset of the first divergence; the shorter length when one side is a
/// prefix of the other. `None` when identical.
#[must_use]
pub fn first_difference(expected: &str, actual: &str) -> Option<usize> {
    if expected == actual {
        return None;
    }
    let common = expected
        .bytes()
        .zip(actual.bytes())
        .take_while(|(e, a)| e == a)
        .count();
    Some(common)
}
