use super::token::{Token, TokenKind};

// Separator sets of the command-line grammar. Anything that is neither
// whitespace nor an operator byte belongs to a word.
const WHITESPACE: &[u8] = b" \t\r\n\x0b";
const SYMBOLS: &[u8] = b"<|>&;()";

/// Cursor over one input line. Each call to [`Lexer::next_token`]
/// returns the next token with its byte range; once the end of the line
/// is reached it keeps returning `Eof`.
pub struct Lexer<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(line: &'a str) -> Self {
        Self { line, pos: 0 }
    }

    pub fn next_token(&mut self) -> Token {
        let bytes = self.line.as_bytes();

        while self.pos < bytes.len() && WHITESPACE.contains(&bytes[self.pos]) {
            self.pos += 1;
        }

        let start = self.pos;
        if start >= bytes.len() {
            return Token {
                kind: TokenKind::Eof,
                start,
                end: start,
            };
        }

        let kind = match bytes[start] {
            b'|' => TokenKind::Pipe,
            b'(' => TokenKind::LeftParen,
            b')' => TokenKind::RightParen,
            b';' => TokenKind::Semicolon,
            b'&' => TokenKind::Ampersand,
            b'<' => TokenKind::RedirIn,
            b'>' => {
                if bytes.get(start + 1) == Some(&b'>') {
                    self.pos += 1;
                    TokenKind::RedirAppend
                } else {
                    TokenKind::RedirOut
                }
            }
            _ => {
                while self.pos < bytes.len()
                    && !WHITESPACE.contains(&bytes[self.pos])
                    && !SYMBOLS.contains(&bytes[self.pos])
                {
                    self.pos += 1;
                }
                return Token {
                    kind: TokenKind::Word,
                    start,
                    end: self.pos,
                };
            }
        };

        self.pos += 1;
        Token {
            kind,
            start,
            end: self.pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Following matklad's `check` pattern, ref:
    // https://matklad.github.io/2021/05/31/how-to-test.html
    fn check(input_str: &str) -> Vec<(TokenKind, String)> {
        let mut lexer = Lexer::new(input_str);
        let mut tokens = vec![];
        loop {
            let token = lexer.next_token();
            if token.kind == TokenKind::Eof {
                break;
            }
            tokens.push((token.kind, token.text(input_str).to_string()));
        }
        tokens
    }

    #[test]
    fn test_simple_cmd_lexing() {
        let tokens = check("ls\n");
        assert_eq!(tokens, vec![(TokenKind::Word, "ls".into())]);
    }

    #[test]
    fn test_cmd_with_args_lexing() {
        let tokens = check("ls -la /tmp\n");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Word, "ls".into()),
                (TokenKind::Word, "-la".into()),
                (TokenKind::Word, "/tmp".into()),
            ]
        );
    }

    #[test]
    fn test_operator_lexing_without_padding() {
        let tokens = check("echo foo|wc;true&");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Word, "echo".into()),
                (TokenKind::Word, "foo".into()),
                (TokenKind::Pipe, "|".into()),
                (TokenKind::Word, "wc".into()),
                (TokenKind::Semicolon, ";".into()),
                (TokenKind::Word, "true".into()),
                (TokenKind::Ampersand, "&".into()),
            ]
        );
    }

    #[test]
    fn test_append_is_one_token() {
        let tokens = check("echo hola >> f >f");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Word, "echo".into()),
                (TokenKind::Word, "hola".into()),
                (TokenKind::RedirAppend, ">>".into()),
                (TokenKind::Word, "f".into()),
                (TokenKind::RedirOut, ">".into()),
                (TokenKind::Word, "f".into()),
            ]
        );
    }

    #[test]
    fn test_subshell_lexing() {
        let tokens = check("(ls)<in");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::LeftParen, "(".into()),
                (TokenKind::Word, "ls".into()),
                (TokenKind::RightParen, ")".into()),
                (TokenKind::RedirIn, "<".into()),
                (TokenKind::Word, "in".into()),
            ]
        );
    }

    #[test]
    fn test_all_whitespace_kinds_are_skipped() {
        let tokens = check(" \t\r\x0b ls \t\n");
        assert_eq!(tokens, vec![(TokenKind::Word, "ls".into())]);
    }

    #[test]
    fn test_empty_line_yields_eof() {
        assert!(check("").is_empty());
        assert!(check("   \n").is_empty());
    }

    #[test]
    fn test_token_ranges_point_into_line() {
        let line = "cat < fichero";
        let mut lexer = Lexer::new(line);

        let cat = lexer.next_token();
        assert_eq!((cat.start, cat.end), (0, 3));

        let lt = lexer.next_token();
        assert_eq!(lt.kind, TokenKind::RedirIn);
        assert_eq!((lt.start, lt.end), (4, 5));

        let file = lexer.next_token();
        assert_eq!(file.text(line), "fichero");

        let eof = lexer.next_token();
        assert_eq!(eof.kind, TokenKind::Eof);
        // Eof is sticky
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }
}
