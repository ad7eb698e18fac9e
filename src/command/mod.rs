pub mod lexer;
pub mod parser;
pub mod token;

use std::fmt::Display;
use std::os::unix::io::RawFd;

/// Maximum number of words in a single `Exec` command.
pub const MAX_ARGS: usize = 16;

/// Parsed representation of one command line. Word slices borrow from
/// the line buffer, which the REPL keeps alive for as long as the tree.
#[derive(Debug)]
pub enum Cmd<'a> {
    Exec(ExecCmd<'a>),
    Redir(RedirCmd<'a>),
    Pipe(Box<Cmd<'a>>, Box<Cmd<'a>>),
    List(Box<Cmd<'a>>, Box<Cmd<'a>>),
    Back(Box<Cmd<'a>>),
    Subshell(Box<Cmd<'a>>),
}

#[derive(Debug, Default)]
pub struct ExecCmd<'a> {
    pub argv: Vec<&'a str>,
}

#[derive(Debug)]
pub struct RedirCmd<'a> {
    pub inner: Box<Cmd<'a>>,
    pub op: RedirOp,
    pub path: &'a str,
    pub target_fd: RawFd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirOp {
    ReadIn,    // "<"
    WriteOut,  // ">"
    AppendOut, // ">>"
}

impl RedirOp {
    /// Descriptor the operator rebinds: stdin for `<`, stdout otherwise.
    pub fn target_fd(&self) -> RawFd {
        match self {
            RedirOp::ReadIn => 0,
            RedirOp::WriteOut | RedirOp::AppendOut => 1,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            RedirOp::ReadIn => "<",
            RedirOp::WriteOut => ">",
            RedirOp::AppendOut => ">>",
        }
    }
}

impl<'a> Cmd<'a> {
    /// An `Exec` with no words, i.e. the no-op produced by an empty line.
    pub fn is_empty_exec(&self) -> bool {
        matches!(self, Cmd::Exec(ecmd) if ecmd.argv.is_empty())
    }
}

// Canonical one-line rendering of the tree, used by the `-d` trace and
// by the parser tests.
impl Display for Cmd<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cmd::Exec(ecmd) => write!(f, "exec({})", ecmd.argv.join(" ")),
            Cmd::Redir(rcmd) => {
                write!(f, "redir({} {} {})", rcmd.inner, rcmd.op.symbol(), rcmd.path)
            }
            Cmd::Pipe(left, right) => write!(f, "pipe({}, {})", left, right),
            Cmd::List(left, right) => write!(f, "list({}, {})", left, right),
            Cmd::Back(inner) => write!(f, "back({})", inner),
            Cmd::Subshell(inner) => write!(f, "subshell({})", inner),
        }
    }
}
