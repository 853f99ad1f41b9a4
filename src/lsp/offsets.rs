use crate::language::span::Span;
use tower_lsp_server::lsp_types::{Position, Range};

/// Column unit negotiated with the client during `initialize`. The protocol
/// default is UTF-16 code units; clients may offer UTF-8 byte columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OffsetEncoding {
    Utf8,
    #[default]
    Utf16,
}

/// Width of one character in the negotiated column unit.
fn char_width(ch: char, encoding: OffsetEncoding) -> u32 {
    match encoding {
        OffsetEncoding::Utf8 => ch.len_utf8() as u32,
        OffsetEncoding::Utf16 => ch.len_utf16() as u32,
    }
}

pub fn offset_to_position(text: &str, offset: usize, encoding: OffsetEncoding) -> Position {
    let offset = offset.min(text.len());
    let mut line = 0u32;
    let mut col = 0u32;
    for (idx, ch) in text.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += char_width(ch, encoding);
        }
    }
    Position::new(line, col)
}

pub fn position_to_offset(text: &str, position: Position, encoding: OffsetEncoding) -> usize {
    let mut offset = 0usize;
    for (current_line, line) in text.split_inclusive('\n').enumerate() {
        let current_line: u32 = current_line.try_into().unwrap_or(u32::MAX);
        if current_line == position.line {
            let mut col = 0u32;
            for ch in line.chars() {
                if col >= position.character || ch == '\n' {
                    break;
                }
                col += char_width(ch, encoding);
                offset += ch.len_utf8();
            }
            return offset;
        }
        offset += line.len();
    }
    text.len()
}

pub fn span_to_range(text: &str, span: Span, encoding: OffsetEncoding) -> Range {
    Range {
        start: offset_to_position(text, span.start, encoding),
        end: offset_to_position(text, span.end, encoding),
    }
}

pub fn range_to_span(text: &str, range: &Range, encoding: OffsetEncoding) -> Span {
    Span::new(
        position_to_offset(text, range.start, encoding),
        position_to_offset(text, range.end, encoding),
    )
}

pub fn full_range(text: &str, encoding: OffsetEncoding) -> Range {
    Range {
        start: Position::new(0, 0),
        end: offset_to_position(text, text.len(), encoding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_columns_agree_across_encodings() {
        let text = "abc\ndef\n";
        for encoding in [OffsetEncoding::Utf8, OffsetEncoding::Utf16] {
            assert_eq!(offset_to_position(text, 5, encoding), Position::new(1, 1));
            assert_eq!(position_to_offset(text, Position::new(1, 1), encoding), 5);
        }
    }

    #[test]
    fn utf16_counts_surrogate_pairs_as_two() {
        // '😀' is 4 bytes in UTF-8 and 2 code units in UTF-16.
        let text = "a😀b";
        assert_eq!(
            offset_to_position(text, 5, OffsetEncoding::Utf16),
            Position::new(0, 3)
        );
        assert_eq!(
            offset_to_position(text, 5, OffsetEncoding::Utf8),
            Position::new(0, 5)
        );
        assert_eq!(
            position_to_offset(text, Position::new(0, 3), OffsetEncoding::Utf16),
            5
        );
    }

    #[test]
    fn crlf_is_one_line_break() {
        let text = "ab\r\ncd";
        assert_eq!(
            offset_to_position(text, 4, OffsetEncoding::Utf16),
            Position::new(1, 0)
        );
    }

    #[test]
    fn position_round_trips_at_every_char_boundary() {
        let text = "héllo\nwörld 😀\nend";
        for encoding in [OffsetEncoding::Utf8, OffsetEncoding::Utf16] {
            for (offset, _) in text.char_indices() {
                let pos = offset_to_position(text, offset, encoding);
                assert_eq!(position_to_offset(text, pos, encoding), offset);
            }
        }
    }

    #[test]
    fn out_of_range_positions_clamp_to_end() {
        let text = "short";
        assert_eq!(
            position_to_offset(text, Position::new(9, 0), OffsetEncoding::Utf16),
            text.len()
        );
    }
}
