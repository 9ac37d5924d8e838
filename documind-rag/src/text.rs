//! Small text utilities shared by embedding, reranking and citation.

/// Split text into lowercase alphanumeric terms of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.chars().count() >= 2)
        .map(|s| s.to_lowercase())
        .collect()
}

/// Byte ranges of the sentences in `text`, trimmed of surrounding whitespace.
///
/// A sentence ends after `.`, `!` or `?` followed by whitespace, or at a
/// line break. Empty sentences are skipped.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                Some((_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                None => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = boundary {
            push_trimmed(text, start, end, &mut spans);
            start = if c == '\n' { i + 1 } else { end };
        }
    }
    push_trimmed(text, start, text.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading + trailing < slice.len() {
        spans.push((start + leading, end - trailing));
    }
}

/// Byte offset of the `n`th character of `text`, or `text.len()` if shorter.
pub fn char_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_drops_short_terms() {
        assert_eq!(tokenize("The Vector-DB, a test!"), vec!["the", "vector", "db", "test"]);
    }

    #[test]
    fn sentences_split_on_terminators_and_newlines() {
        let text = "First one. Second!\nThird line  \n\n  v1.2 stays whole?";
        let sentences: Vec<&str> = sentence_spans(text).iter().map(|&(s, e)| &text[s..e]).collect();
        assert_eq!(sentences, vec!["First one.", "Second!", "Third line", "v1.2 stays whole?"]);
    }

    #[test]
    fn char_offset_handles_multibyte() {
        assert_eq!(char_offset("héllo", 2), 3);
        assert_eq!(char_offset("hé", 10), 3);
    }
}
