//! Small string helpers shared by the deterministic text passes.
//!
//! All offsets are byte offsets into UTF-8 text.

/// Largest char boundary `<= idx`.
pub(crate) fn floor_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut i = idx;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary `>= idx`.
pub(crate) fn ceil_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut i = idx;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Text surrounding `[start, end)` with `radius` bytes of slack on each side.
pub(crate) fn context_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = floor_boundary(text, start.saturating_sub(radius));
    let to = ceil_boundary(text, end.saturating_add(radius));
    &text[from..to]
}

/// Text preceding `pos`, at most `window` bytes.
pub(crate) fn window_before(text: &str, pos: usize, window: usize) -> (usize, &str) {
    let end = floor_boundary(text, pos);
    let start = floor_boundary(text, end.saturating_sub(window));
    (start, &text[start..end])
}

/// Lowercase alphanumerics only; used to compare values that differ in
/// punctuation, spacing or case.
pub(crate) fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Drop leading zeros from an all-digit value. Other values are returned as is.
pub(crate) fn strip_leading_zeros(value: &str) -> &str {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let trimmed = value.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    } else {
        value
    }
}

/// Collapse runs of whitespace to single spaces and trim.
pub(crate) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein distance over chars.
pub(crate) fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
