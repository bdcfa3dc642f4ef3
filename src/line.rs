//! Line buffer and lexical cursor primitives.
//!
//! The scanner is tokenless: each [`Line`] carries a case-folded working
//! copy of one source line plus a mutable read cursor, and the parser pulls
//! names, literals, and fixed tokens directly off it. Every read either
//! consumes what it matched or restores the cursor, so candidate productions
//! can retry freely.

fn is_blank(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

fn continues_name(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

pub struct Line {
    offset: usize,
    original: String,
    content: String,
    column: usize,
}

impl Line {
    pub fn new(offset: usize, text: &str) -> Self {
        Self {
            offset,
            original: text.to_string(),
            content: text.to_ascii_lowercase(),
            column: 0,
        }
    }

    fn byte(&self, at: usize) -> Option<u8> {
        self.content.as_bytes().get(at).copied()
    }

    pub fn skip_blanks(&mut self) {
        while self.byte(self.column).map_or(false, is_blank) {
            self.column += 1;
        }
    }

    /// A letter followed by letters, digits, or underscores. Returns an
    /// empty string (cursor untouched) when the next token is not a name.
    pub fn read_name(&mut self) -> String {
        let save = self.column;
        self.skip_blanks();
        if !self.byte(self.column).map_or(false, |c| c.is_ascii_alphabetic()) {
            self.column = save;
            return String::new();
        }
        let begin = self.column;
        while self.byte(self.column).map_or(false, continues_name) {
            self.column += 1;
        }
        self.content[begin..self.column].to_string()
    }

    pub fn read_one_blank(&mut self) -> bool {
        if self.byte(self.column).map_or(false, is_blank) {
            self.column += 1;
            true
        } else {
            false
        }
    }

    /// Consumes trailing blanks only when nothing else remains on the line.
    pub fn is_end_of_line(&mut self) -> bool {
        let save = self.column;
        self.skip_blanks();
        if self.column == self.content.len() {
            true
        } else {
            self.column = save;
            false
        }
    }

    pub fn read_token(&mut self, tok: &str) -> bool {
        let save = self.column;
        self.skip_blanks();
        if self.content[self.column..].starts_with(tok) {
            self.column += tok.len();
            true
        } else {
            self.column = save;
            false
        }
    }

    /// Like [`read_token`](Self::read_token), but the character after the
    /// match must not continue an identifier or open a parenthesis. This
    /// keeps `.lt.` from matching inside a longer word-like token and keeps
    /// `<` from being taken out of a designator-adjacent position.
    pub fn read_operator(&mut self, op: &str) -> bool {
        let save = self.column;
        self.skip_blanks();
        if !self.content[self.column..].starts_with(op) {
            self.column = save;
            return false;
        }
        let end = self.column + op.len();
        match self.byte(end) {
            Some(c) if continues_name(c) || c == b'(' => {
                self.column = save;
                false
            }
            _ => {
                self.column = end;
                true
            }
        }
    }

    pub fn read_int_constant(&mut self) -> String {
        let save = self.column;
        self.skip_blanks();
        let begin = self.column;
        while self.byte(self.column).map_or(false, |c| c.is_ascii_digit()) {
            self.column += 1;
        }
        if self.column == begin {
            self.column = save;
            return String::new();
        }
        self.content[begin..self.column].to_string()
    }

    /// Digits, a point, then at least one digit. No partial consumption:
    /// `12` or `12.` restore the cursor and return empty.
    pub fn read_real_constant(&mut self) -> String {
        let save = self.column;
        self.skip_blanks();
        let begin = self.column;
        while self.byte(self.column).map_or(false, |c| c.is_ascii_digit()) {
            self.column += 1;
        }
        if self.byte(self.column) == Some(b'.')
            && self.byte(self.column + 1).map_or(false, |c| c.is_ascii_digit())
        {
            self.column += 1;
            while self.byte(self.column).map_or(false, |c| c.is_ascii_digit()) {
                self.column += 1;
            }
            self.content[begin..self.column].to_string()
        } else {
            self.column = save;
            String::new()
        }
    }

    pub fn read_logical_constant(&mut self) -> Option<bool> {
        if self.read_token(".true.") {
            return Some(true);
        }
        if self.read_token(".false.") {
            return Some(false);
        }
        None
    }

    /// A quoted literal with no escape handling. The value is taken from the
    /// original text so letter case inside the quotes survives folding.
    pub fn read_character_constant(&mut self) -> Option<String> {
        let save = self.column;
        self.skip_blanks();
        let quote = match self.byte(self.column) {
            Some(q @ (b'\'' | b'"')) => q,
            _ => {
                self.column = save;
                return None;
            }
        };
        let begin = self.column + 1;
        let mut at = begin;
        while let Some(c) = self.byte(at) {
            if c == quote {
                let value = self.original[begin..at].to_string();
                self.column = at + 1;
                return Some(value);
            }
            at += 1;
        }
        self.column = save;
        None
    }

    /// Byte offset of this line's first character in the whole source.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn set_column(&mut self, column: usize) {
        self.column = column;
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> Line {
        Line::new(0, text)
    }

    #[test]
    fn read_name_stops_at_boundary() {
        let mut l = line("  count2 = 1");
        assert_eq!(l.read_name(), "count2");
        assert!(l.read_token("="));
    }

    #[test]
    fn read_name_failure_restores_cursor() {
        let mut l = line("   123");
        assert_eq!(l.read_name(), "");
        assert_eq!(l.column(), 0);
    }

    #[test]
    fn read_token_is_case_insensitive_via_folding() {
        let mut l = line("PRINT *, x");
        assert!(l.read_token("print"));
        assert!(l.read_token("*"));
    }

    #[test]
    fn read_operator_rejects_identifier_continuation() {
        let mut l = line("a .lt.b");
        assert_eq!(l.read_name(), "a");
        assert!(!l.read_operator(".lt."));
        let col = l.column();
        assert!(l.read_token(".lt."));
        assert!(col <= 2, "failed operator read must not consume");
    }

    #[test]
    fn read_operator_accepts_blank_delimited_match() {
        let mut l = line("a .lt. b");
        assert_eq!(l.read_name(), "a");
        assert!(l.read_operator(".lt."));
        assert_eq!(l.read_name(), "b");
    }

    #[test]
    fn read_real_restores_on_missing_fraction() {
        let mut l = line("12 ");
        assert_eq!(l.read_real_constant(), "");
        assert_eq!(l.column(), 0);
        assert_eq!(l.read_int_constant(), "12");
    }

    #[test]
    fn read_real_accepts_leading_point() {
        let mut l = line(".5");
        assert_eq!(l.read_real_constant(), ".5");
    }

    #[test]
    fn is_end_of_line_restores_when_not_at_end() {
        let mut l = line("  x");
        assert!(!l.is_end_of_line());
        assert_eq!(l.column(), 0);
        assert_eq!(l.read_name(), "x");
        assert!(l.is_end_of_line());
    }

    #[test]
    fn character_constant_preserves_original_case() {
        let mut l = line("'Hello World'");
        assert_eq!(l.read_character_constant().as_deref(), Some("Hello World"));
    }

    #[test]
    fn character_constant_requires_closing_quote() {
        let mut l = line("'abc");
        assert_eq!(l.read_character_constant(), None);
        assert_eq!(l.column(), 0);
    }

    #[test]
    fn logical_constants() {
        let mut l = line(".true. .false.");
        assert_eq!(l.read_logical_constant(), Some(true));
        assert_eq!(l.read_logical_constant(), Some(false));
        assert_eq!(l.read_logical_constant(), None);
    }
}
