use std::fmt::Display;

/// One lexical unit of the command line. `start`/`end` are byte offsets
/// into the line buffer, so a `Word` token can be resolved back to its
/// text without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, line: &'a str) -> &'a str {
        &line[self.start..self.end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Pipe,       // "|"
    LeftParen,  // "("
    RightParen, // ")"
    Semicolon,  // ";"
    Ampersand,  // "&"
    RedirIn,    // "<"
    RedirOut,   // ">"
    RedirAppend, // ">>"
    Eof,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant_str = match self {
            TokenKind::Word => "palabra",
            TokenKind::Pipe => "|",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::Semicolon => ";",
            TokenKind::Ampersand => "&",
            TokenKind::RedirIn => "<",
            TokenKind::RedirOut => ">",
            TokenKind::RedirAppend => ">>",
            TokenKind::Eof => "fin de línea",
        };

        write!(f, "{}", variant_str)
    }
}
