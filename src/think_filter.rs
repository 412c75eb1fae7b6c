//! Thinking-tag filter (SPEC_FULL.md §4.5): strips `<think>...</think>`
//! reasoning spans from user-visible output, both in a single complete
//! string and incrementally across a token stream.

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Non-stream filter: remove all `<think>...</think>` spans. If nothing
/// remains after stripping, the original text is returned unchanged.
pub fn strip_think_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        match rest.find(OPEN_TAG) {
            None => {
                result.push_str(rest);
                break;
            }
            Some(open_idx) => {
                result.push_str(&rest[..open_idx]);
                let after_open = &rest[open_idx + OPEN_TAG.len()..];
                match after_open.find(CLOSE_TAG) {
                    Some(close_idx) => {
                        rest = &after_open[close_idx + CLOSE_TAG.len()..];
                    }
                    None => {
                        // Unterminated tag: drop the rest as muted content.
                        rest = "";
                        break;
                    }
                }
            }
        }
    }

    let stripped = result.trim();
    if stripped.is_empty() {
        text.to_string()
    } else {
        result
    }
}

/// Streaming state machine: tokens outside a think span forward immediately;
/// `<think>` enters muted state, `</think>` exits it. Tolerates tags split
/// across token boundaries and never splits a multi-byte UTF-8 character,
/// by buffering incomplete tag prefixes/suffixes until they resolve.
pub struct ThinkFilter {
    muted: bool,
    /// Bytes that might be the start of `<think>`/`</think>` but aren't
    /// confirmed yet — held back until disambiguated.
    pending: String,
}

impl Default for ThinkFilter {
    fn default() -> Self {
        Self { muted: false, pending: String::new() }
    }
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token; returns the text (possibly empty) that should be
    /// forwarded to the client right now.
    pub fn push(&mut self, token: &str) -> String {
        self.pending.push_str(token);
        let mut output = String::new();

        loop {
            if self.muted {
                match self.pending.find(CLOSE_TAG) {
                    Some(idx) => {
                        self.pending = self.pending[idx + CLOSE_TAG.len()..].to_string();
                        self.muted = false;
                    }
                    None => {
                        // Keep a tail long enough to still catch a split
                        // "</think>" on the next push; discard the rest.
                        let keep = CLOSE_TAG.len().saturating_sub(1);
                        let cut = self.pending.len().saturating_sub(keep);
                        let cut = floor_char_boundary(&self.pending, cut);
                        self.pending.drain(..cut);
                        break;
                    }
                }
            } else {
                match self.pending.find(OPEN_TAG) {
                    Some(idx) => {
                        output.push_str(&self.pending[..idx]);
                        self.pending = self.pending[idx + OPEN_TAG.len()..].to_string();
                        self.muted = true;
                    }
                    None => {
                        // Hold back a suffix that could be the start of
                        // "<think>" split across the next token.
                        let hold = OPEN_TAG.len().saturating_sub(1);
                        let safe_len = self.pending.len().saturating_sub(hold);
                        let safe_len = floor_char_boundary(&self.pending, safe_len);
                        output.push_str(&self.pending[..safe_len]);
                        self.pending.drain(..safe_len);
                        break;
                    }
                }
            }
        }

        output
    }

    /// Flush anything still buffered at stream end (no unterminated
    /// `<think>` is assumed to ever close).
    pub fn finish(mut self) -> String {
        if self.muted {
            String::new()
        } else {
            std::mem::take(&mut self.pending)
        }
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_think_span() {
        assert_eq!(strip_think_tags("<think>plan</think>answer"), "answer");
    }

    #[test]
    fn strips_multiple_spans() {
        assert_eq!(
            strip_think_tags("<think>a</think>one<think>b</think>two"),
            "onetwo"
        );
    }

    #[test]
    fn all_think_leaves_original_unchanged() {
        let text = "<think>only thoughts here</think>";
        assert_eq!(strip_think_tags(text), text);
    }

    #[test]
    fn idempotent_on_already_stripped_text() {
        let once = strip_think_tags("<think>x</think>clean");
        let twice = strip_think_tags(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn stream_filter_passes_through_plain_tokens() {
        let mut filter = ThinkFilter::new();
        let mut out = String::new();
        for tok in ["hel", "lo "] {
            out.push_str(&filter.push(tok));
        }
        out.push_str(&filter.finish());
        assert_eq!(out, "hello ");
    }

    #[test]
    fn stream_filter_mutes_think_span_across_token_boundaries() {
        let mut filter = ThinkFilter::new();
        let mut out = String::new();
        for tok in ["before", "<thi", "nk>hidden</thi", "nk>after"] {
            out.push_str(&filter.push(tok));
        }
        out.push_str(&filter.finish());
        assert_eq!(out, "beforeafter");
    }

    #[test]
    fn stream_filter_holds_back_only_at_char_boundaries() {
        let mut filter = ThinkFilter::new();
        let mut out = String::new();
        // "café<" — the held-back suffix for a possible "<think>" start
        // must never land inside the multi-byte 'é'.
        for tok in ["caf\u{00e9}", "<", "think>x</think>done"] {
            out.push_str(&filter.push(tok));
        }
        out.push_str(&filter.finish());
        assert_eq!(out, "caf\u{00e9}done");
    }
}
