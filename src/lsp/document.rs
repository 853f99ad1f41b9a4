use crate::lsp::offsets::{range_to_span, OffsetEncoding};
use tower_lsp_server::lsp_types::{Range, TextDocumentContentChangeEvent};

/// Text buffer with incremental edit application. Edits arrive in the
/// negotiated column encoding; byte splicing goes through `offsets`. After
/// an edit the previous text is gone.
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    text: String,
}

impl Buffer {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn replace(&mut self, range: &Range, new_text: &str, encoding: OffsetEncoding) {
        let span = range_to_span(&self.text, range, encoding);
        let start = span.start.min(self.text.len());
        let end = span.end.clamp(start, self.text.len());
        self.text.replace_range(start..end, new_text);
    }

    pub fn replace_all(&mut self, new_text: String) {
        self.text = new_text;
    }

    pub fn apply(&mut self, change: &TextDocumentContentChangeEvent, encoding: OffsetEncoding) {
        match change.range {
            Some(range) => self.replace(&range, &change.text, encoding),
            None => self.replace_all(change.text.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp_server::lsp_types::Position;

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    #[test]
    fn ranged_edit_matches_plain_splicing() {
        let mut buffer = Buffer::new("const x = 1;\nconst y = 2;\n".into());
        buffer.replace(&range(0, 6, 0, 7), "renamed", OffsetEncoding::Utf16);
        assert_eq!(buffer.text(), "const renamed = 1;\nconst y = 2;\n");
    }

    #[test]
    fn edits_apply_in_order() {
        let mut buffer = Buffer::new("abc".into());
        for change in [
            TextDocumentContentChangeEvent {
                range: Some(range(0, 3, 0, 3)),
                range_length: None,
                text: "d".into(),
            },
            TextDocumentContentChangeEvent {
                range: Some(range(0, 0, 0, 1)),
                range_length: None,
                text: "".into(),
            },
        ] {
            buffer.apply(&change, OffsetEncoding::Utf16);
        }
        assert_eq!(buffer.text(), "bcd");
    }

    #[test]
    fn full_change_replaces_everything() {
        let mut buffer = Buffer::new("old".into());
        buffer.apply(
            &TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "new text".into(),
            },
            OffsetEncoding::Utf16,
        );
        assert_eq!(buffer.text(), "new text");
    }

    #[test]
    fn utf16_columns_splice_around_wide_chars() {
        let mut buffer = Buffer::new("a😀b".into());
        // the emoji spans columns 1..3 in UTF-16
        buffer.replace(&range(0, 1, 0, 3), "_", OffsetEncoding::Utf16);
        assert_eq!(buffer.text(), "a_b");
    }
}
