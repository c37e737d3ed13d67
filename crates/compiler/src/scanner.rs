//! Hand-written lexer. Tokens borrow their lexeme directly from the source
//! string, so scanning allocates nothing; the single-pass compiler turns
//! each token into bytecode as it arrives instead of building a token
//! vector or an AST first.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Single-character
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    // One or two character
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    // Literals
    Identifier,
    String,
    Number,
    // Keywords
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,
    Error,
    Eof,
}

#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
}

pub struct Scanner<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Scanner<'src> {
        Scanner {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace_and_comments();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                let kind = if self.matches(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.matches(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            b'\0'
        } else {
            self.bytes[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() {
            b'\0'
        } else {
            self.bytes[self.current + 1]
        }
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token {
            kind,
            lexeme: &self.source[self.start..self.current],
            line: self.line,
        }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token {
            kind: TokenKind::Error,
            lexeme: message,
            line: self.line,
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                b'/' if self.peek_next() == b'*' => {
                    self.skip_block_comment();
                }
                _ => return,
            }
        }
    }

    /// Block comments nest, unlike C's `/* */`.
    fn skip_block_comment(&mut self) {
        self.advance(); // '/'
        self.advance(); // '*'
        let mut depth = 1;
        while depth > 0 && !self.is_at_end() {
            if self.peek() == b'/' && self.peek_next() == b'*' {
                self.advance();
                self.advance();
                depth += 1;
            } else if self.peek() == b'*' && self.peek_next() == b'/' {
                self.advance();
                self.advance();
                depth -= 1;
            } else {
                if self.peek() == b'\n' {
                    self.line += 1;
                }
                self.advance();
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        self.advance(); // closing quote
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || self.peek().is_ascii_digit() {
            self.advance();
        }
        let text = &self.source[self.start..self.current];
        self.make_token(keyword_kind(text))
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

/// A keyword is recognized by its first (or first two, for the two
/// branches that share a prefix) characters, then a single comparison of
/// the remaining bytes against the one keyword left standing -- a
/// hand-written trie, not a hash lookup, since the identifier's own bytes
/// are already in hand from scanning.
fn keyword_kind(text: &str) -> TokenKind {
    let bytes = text.as_bytes();
    match bytes.first() {
        Some(b'a') => check_keyword(bytes, 1, "nd", TokenKind::And),
        Some(b'c') => check_keyword(bytes, 1, "lass", TokenKind::Class),
        Some(b'e') => check_keyword(bytes, 1, "lse", TokenKind::Else),
        Some(b'f') if bytes.len() > 1 => match bytes[1] {
            b'a' => check_keyword(bytes, 2, "lse", TokenKind::False),
            b'o' => check_keyword(bytes, 2, "r", TokenKind::For),
            b'u' => check_keyword(bytes, 2, "n", TokenKind::Fun),
            _ => TokenKind::Identifier,
        },
        Some(b'i') => check_keyword(bytes, 1, "f", TokenKind::If),
        Some(b'n') => check_keyword(bytes, 1, "il", TokenKind::Nil),
        Some(b'o') => check_keyword(bytes, 1, "r", TokenKind::Or),
        Some(b'p') => check_keyword(bytes, 1, "rint", TokenKind::Print),
        Some(b'r') => check_keyword(bytes, 1, "eturn", TokenKind::Return),
        Some(b's') => check_keyword(bytes, 1, "uper", TokenKind::Super),
        Some(b't') if bytes.len() > 1 => match bytes[1] {
            b'h' => check_keyword(bytes, 2, "is", TokenKind::This),
            b'r' => check_keyword(bytes, 2, "ue", TokenKind::True),
            _ => TokenKind::Identifier,
        },
        Some(b'v') => check_keyword(bytes, 1, "ar", TokenKind::Var),
        Some(b'w') => check_keyword(bytes, 1, "hile", TokenKind::While),
        _ => TokenKind::Identifier,
    }
}

/// Compares `bytes[start..]` against `rest`, the tail of the one keyword
/// that first-character dispatch narrowed things down to. Any mismatch --
/// wrong length, wrong bytes -- falls back to a plain identifier, exactly
/// as clox's `checkKeyword` does.
fn check_keyword(bytes: &[u8], start: usize, rest: &str, kind: TokenKind) -> TokenKind {
    if &bytes[start..] == rest.as_bytes() {
        kind
    } else {
        TokenKind::Identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan_token();
            let done = token.kind == TokenKind::Eof;
            kinds.push(token.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn scans_arithmetic_expression() {
        let kinds = scan_all("1 + 2 * 3");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Star,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_are_not_identifiers() {
        let kinds = scan_all("class fun superb");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Class,
                TokenKind::Fun,
                // "superb" must not be lexed as "super" + "b".
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_block_comments_skip_to_matching_close() {
        let kinds = scan_all("/* outer /* inner */ still-comment */ 42");
        assert_eq!(kinds, vec![TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let kinds = scan_all("\"abc");
        assert_eq!(kinds, vec![TokenKind::Error, TokenKind::Eof]);
    }

    #[test]
    fn tracks_line_numbers_across_newlines() {
        let mut scanner = Scanner::new("1\n2\n3");
        let a = scanner.scan_token();
        let b = scanner.scan_token();
        let c = scanner.scan_token();
        assert_eq!((a.line, b.line, c.line), (1, 2, 3));
    }
}
