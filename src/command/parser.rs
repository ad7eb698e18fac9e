use crate::errors::ShellError;

use super::{
    lexer::Lexer,
    token::{Token, TokenKind},
    Cmd, ExecCmd, RedirCmd, RedirOp, MAX_ARGS,
};

/// Recursive-descent parser over the grammar
///
/// ```text
/// line      := pipe ('&')* (';' line)?
/// pipe      := exec ('|' pipe)?
/// exec      := subshell | (redir* word (word | redir)*)
/// subshell  := '(' line ')' redir*
/// redir     := ('<' | '>' | '>>') word
/// ```
pub struct Parser<'a> {
    line: &'a str,
    lexer: Lexer<'a>,
    lookahead: Token,
}

/// Parse one command line into a tree. The tree borrows its words from
/// `line`.
pub fn parse(line: &str) -> Result<Cmd<'_>, ShellError> {
    Parser::new(line).parse()
}

impl<'a> Parser<'a> {
    fn new(line: &'a str) -> Self {
        let mut lexer = Lexer::new(line);
        let lookahead = lexer.next_token();
        Self {
            line,
            lexer,
            lookahead,
        }
    }

    fn parse(mut self) -> Result<Cmd<'a>, ShellError> {
        let cmd = self.line_rule()?;

        if self.lookahead.kind != TokenKind::Eof {
            return Err(ShellError::Syntax(format!(
                "token inesperado '{}'",
                self.lookahead.text(self.line)
            )));
        }

        Ok(cmd)
    }

    fn bump(&mut self) -> Token {
        std::mem::replace(&mut self.lookahead, self.lexer.next_token())
    }

    fn peek(&self) -> TokenKind {
        self.lookahead.kind
    }

    fn line_rule(&mut self) -> Result<Cmd<'a>, ShellError> {
        let mut cmd = self.pipe_rule()?;

        while self.peek() == TokenKind::Ampersand {
            self.bump();
            cmd = Cmd::Back(Box::new(cmd));
        }

        if self.peek() == TokenKind::Semicolon {
            if cmd.is_empty_exec() {
                return Err(ShellError::Syntax("no se encontró comando antes de ';'".into()));
            }
            self.bump();
            let rest = self.line_rule()?;
            cmd = Cmd::List(Box::new(cmd), Box::new(rest));
        }

        Ok(cmd)
    }

    fn pipe_rule(&mut self) -> Result<Cmd<'a>, ShellError> {
        let cmd = self.exec_rule()?;

        if self.peek() == TokenKind::Pipe {
            if cmd.is_empty_exec() {
                return Err(ShellError::Syntax("no se encontró comando antes de '|'".into()));
            }
            self.bump();
            let rest = self.pipe_rule()?;
            if rest.is_empty_exec() {
                return Err(ShellError::Syntax("no se encontró comando después de '|'".into()));
            }
            return Ok(Cmd::Pipe(Box::new(cmd), Box::new(rest)));
        }

        Ok(cmd)
    }

    fn exec_rule(&mut self) -> Result<Cmd<'a>, ShellError> {
        if self.peek() == TokenKind::LeftParen {
            return self.subshell_rule();
        }

        // Words and redirections may interleave freely; redirections
        // wrap in encounter order, so the one written last ends up as
        // the outermost node.
        let mut argv: Vec<&'a str> = vec![];
        let mut redirs: Vec<(RedirOp, &'a str)> = vec![];

        loop {
            self.redirs_rule(&mut redirs)?;

            match self.peek() {
                TokenKind::Word => {
                    if argv.len() == MAX_ARGS {
                        return Err(ShellError::Syntax("demasiados argumentos".into()));
                    }
                    let token = self.bump();
                    argv.push(token.text(self.line));
                }
                TokenKind::LeftParen => {
                    return Err(ShellError::Syntax("se esperaba un argumento, no '('".into()));
                }
                _ => break,
            }
        }

        let mut cmd = Cmd::Exec(ExecCmd { argv });
        for (op, path) in redirs {
            cmd = wrap_redir(cmd, op, path);
        }

        Ok(cmd)
    }

    fn subshell_rule(&mut self) -> Result<Cmd<'a>, ShellError> {
        self.bump(); // '('

        let inner = self.line_rule()?;

        if self.peek() != TokenKind::RightParen {
            return Err(ShellError::Syntax("se esperaba ')'".into()));
        }
        self.bump();

        let mut cmd = Cmd::Subshell(Box::new(inner));

        let mut redirs = vec![];
        self.redirs_rule(&mut redirs)?;
        for (op, path) in redirs {
            cmd = wrap_redir(cmd, op, path);
        }

        Ok(cmd)
    }

    fn redirs_rule(&mut self, redirs: &mut Vec<(RedirOp, &'a str)>) -> Result<(), ShellError> {
        loop {
            let op = match self.peek() {
                TokenKind::RedirIn => RedirOp::ReadIn,
                TokenKind::RedirOut => RedirOp::WriteOut,
                TokenKind::RedirAppend => RedirOp::AppendOut,
                _ => return Ok(()),
            };
            self.bump();

            if self.peek() != TokenKind::Word {
                return Err(ShellError::Syntax(format!(
                    "se esperaba un fichero después de '{}'",
                    op.symbol()
                )));
            }
            let token = self.bump();
            redirs.push((op, token.text(self.line)));
        }
    }
}

fn wrap_redir<'a>(inner: Cmd<'a>, op: RedirOp, path: &'a str) -> Cmd<'a> {
    Cmd::Redir(RedirCmd {
        inner: Box::new(inner),
        target_fd: op.target_fd(),
        op,
        path,
    })
}
