//! `psplit`: split input files (or stdin) into consecutive chunk files
//! `<source>0`, `<source>1`, … by line count (`-l`) or byte count
//! (`-b`), farming files out to up to `-p` worker children.

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{anyhow, Context};
use nix::{
    errno::Errno,
    fcntl::{open, OFlag},
    sys::{stat::Mode, wait::waitpid},
    unistd::{close, fork, fsync, read, write, ForkResult, Pid},
};
use std::os::unix::io::RawFd;

use crate::{
    command::ExecCmd,
    engine::Flow,
    frontend::{write_to_stderr, write_to_stdout},
    signals::ChldBlock,
};

const DEFAULT_BSIZE: usize = 1024;
const MAX_BSIZE: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    Lines(usize),
    Bytes(usize),
}

#[derive(Debug, PartialEq, Eq)]
pub struct Opts<'a> {
    pub mode: SplitMode,
    pub bsize: usize,
    pub procs: usize,
    pub files: Vec<&'a str>,
}

#[derive(Debug, PartialEq, Eq)]
enum PsplitCmd<'a> {
    Help,
    Split(Opts<'a>),
}

fn help_psplit() -> &'static str {
    "Uso: psplit [-l NLINES] [-b NBYTES] [-s BSIZE] [-p PROCS] [FILE1] [FILE2]...\n\
     \tOpciones:\n\
     \t-l NLINES Número máximo de líneas por fichero.\n\
     \t-b NBYTES Número máximo de bytes por fichero.\n\
     \t-s BSIZE Tamaño en bytes de los bloques leídos de [FILEn] o stdin.\n\
     \t-p PROCS Número máximo de procesos simultáneos.\n\
     \t-h Ayuda\n"
}

pub fn run(ecmd: &ExecCmd) -> anyhow::Result<Flow> {
    match parse_opts(&ecmd.argv[1..]) {
        Err(msg) => write_to_stderr(&format!("psplit: {msg}\n"))?,
        Ok(PsplitCmd::Help) => write_to_stdout(help_psplit())?,
        Ok(PsplitCmd::Split(opts)) => {
            if opts.files.is_empty() {
                // Reading stdin: a single in-process split, `-p` does
                // not apply.
                if let Err(err) = do_split(libc::STDIN_FILENO, opts.mode, opts.bsize, "stdin") {
                    write_to_stderr(&format!("psplit: {err}\n"))?;
                }
            } else {
                split_files(&opts)?;
            }
        }
    }

    Ok(Flow::Continue)
}

fn parse_opts<'a>(args: &[&'a str]) -> Result<PsplitCmd<'a>, String> {
    let mut lines = None;
    let mut bytes = None;
    let mut bsize = DEFAULT_BSIZE;
    let mut procs = 1;

    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "-h" => return Ok(PsplitCmd::Help),
            "-l" => {
                if bytes.is_some() {
                    return Err("Opciones incompatibles".into());
                }
                lines = Some(positive(args.get(i + 1), "-l")?);
                i += 2;
            }
            "-b" => {
                if lines.is_some() {
                    return Err("Opciones incompatibles".into());
                }
                bytes = Some(positive(args.get(i + 1), "-b")?);
                i += 2;
            }
            "-s" => {
                bsize = positive(args.get(i + 1), "-s")?;
                if bsize > MAX_BSIZE {
                    return Err("Opción -s no válida".into());
                }
                i += 2;
            }
            "-p" => {
                procs = positive(args.get(i + 1), "-p")?;
                i += 2;
            }
            arg if arg.len() > 1 && arg.starts_with('-') => {
                return Err(format!("Opción '{arg}' no válida"));
            }
            _ => break,
        }
    }

    let mode = match (lines, bytes) {
        (Some(limit), None) => SplitMode::Lines(limit),
        (None, Some(limit)) => SplitMode::Bytes(limit),
        _ => return Err("Debe especificarse -l o -b".into()),
    };

    Ok(PsplitCmd::Split(Opts {
        mode,
        bsize,
        procs,
        files: args[i..].to_vec(),
    }))
}

fn positive(arg: Option<&&str>, flag: &str) -> Result<usize, String> {
    arg.and_then(|value| value.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("Opción {flag} no válida"))
}

/// Split each file in its own worker child, keeping at most
/// `opts.procs` workers alive. The ring is FIFO: when full, the oldest
/// worker is awaited before the next fork, and leftover workers are
/// drained in spawn order. SIGCHLD stays blocked for the whole
/// operation so the background reaper cannot steal the workers.
fn split_files(opts: &Opts) -> anyhow::Result<()> {
    let _block = ChldBlock::new().context("sigprocmask")?;

    let mut ring: VecDeque<Pid> = VecDeque::with_capacity(opts.procs);

    for file in &opts.files {
        if ring.len() == opts.procs {
            let oldest = ring.pop_front().expect("ring cannot be empty when full");
            waitpid(oldest, None).context("waitpid psplit")?;
        }

        match unsafe { fork() }.context("fork psplit")? {
            ForkResult::Child => worker(file, opts.mode, opts.bsize),
            ForkResult::Parent { child } => ring.push_back(child),
        }
    }

    for pid in ring {
        waitpid(pid, None).context("waitpid psplit")?;
    }

    Ok(())
}

// A failed worker reports on its own stderr and exits non-zero; the
// parent keeps going and still waits for every spawned worker.
fn worker(path: &str, mode: SplitMode, bsize: usize) -> ! {
    let code = match split_one_file(path, mode, bsize) {
        Ok(()) => 0,
        Err(err) => {
            let _ = write_to_stderr(&format!("psplit: {err}\n"));
            1
        }
    };

    unsafe { libc::_exit(code) }
}

fn split_one_file(path: &str, mode: SplitMode, bsize: usize) -> anyhow::Result<()> {
    let fd = open(Path::new(path), OFlag::O_RDONLY, Mode::empty())
        .map_err(|errno| anyhow!("{path}: {errno}"))?;

    let result = do_split(fd, mode, bsize, path);
    let _ = close(fd);
    result
}

/// Copy everything readable from `fd` into chunk files named
/// `<source>0`, `<source>1`, … A new chunk is only opened once more
/// data actually arrives, so input ending exactly on a boundary leaves
/// no empty trailing chunk.
pub fn do_split(fd: RawFd, mode: SplitMode, bsize: usize, source: &str) -> anyhow::Result<()> {
    let mut buf = vec![0u8; bsize];
    let mut out = ChunkWriter::create(source)?;

    match mode {
        SplitMode::Bytes(limit) => {
            let mut quota = limit;
            loop {
                let got = read_retry(fd, &mut buf)?;
                if got == 0 {
                    break;
                }

                // A read may straddle chunk boundaries; carve it up.
                let mut off = 0;
                while off < got {
                    if quota == 0 {
                        out.rotate()?;
                        quota = limit;
                    }
                    let take = (got - off).min(quota);
                    out.write_all(&buf[off..off + take])?;
                    off += take;
                    quota -= take;
                }
            }
        }
        SplitMode::Lines(limit) => {
            let mut seen = 0;
            loop {
                let got = read_retry(fd, &mut buf)?;
                if got == 0 {
                    break;
                }

                let mut off = 0;
                while off < got {
                    if seen == limit {
                        out.rotate()?;
                        seen = 0;
                    }
                    // Advance past complete lines until the chunk's
                    // quota fills or the buffer runs out; a trailing
                    // partial line stays in the current chunk.
                    let mut i = off;
                    loop {
                        if buf[i] == b'\n' {
                            seen += 1;
                        }
                        i += 1;
                        if i >= got || seen == limit {
                            break;
                        }
                    }
                    out.write_all(&buf[off..i])?;
                    off = i;
                }
            }
        }
    }

    out.finish()
}

/// The currently open chunk file. `finish`/`rotate` fsync before
/// closing; on an error path the drop still releases the descriptor.
struct ChunkWriter<'a> {
    source: &'a str,
    index: u32,
    fd: RawFd,
}

impl<'a> ChunkWriter<'a> {
    fn create(source: &'a str) -> anyhow::Result<Self> {
        let fd = open_chunk(source, 0)?;
        Ok(Self {
            source,
            index: 0,
            fd,
        })
    }

    fn write_all(&mut self, mut buf: &[u8]) -> anyhow::Result<()> {
        while !buf.is_empty() {
            match write(self.fd, buf) {
                Ok(written) => buf = &buf[written..],
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(anyhow!("{}{}: write: {errno}", self.source, self.index)),
            }
        }
        Ok(())
    }

    fn rotate(&mut self) -> anyhow::Result<()> {
        self.sync_close()?;
        self.index += 1;
        self.fd = open_chunk(self.source, self.index)?;
        Ok(())
    }

    fn finish(mut self) -> anyhow::Result<()> {
        self.sync_close()
    }

    fn sync_close(&mut self) -> anyhow::Result<()> {
        fsync(self.fd).map_err(|errno| anyhow!("{}{}: fsync: {errno}", self.source, self.index))?;
        let fd = std::mem::replace(&mut self.fd, -1);
        close(fd).map_err(|errno| anyhow!("{}{}: close: {errno}", self.source, self.index))?;
        Ok(())
    }
}

impl Drop for ChunkWriter<'_> {
    fn drop(&mut self) {
        if self.fd >= 0 {
            let _ = close(self.fd);
        }
    }
}

fn open_chunk(source: &str, index: u32) -> anyhow::Result<RawFd> {
    let name = format!("{source}{index}");
    open(
        Path::new(&name),
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        Mode::S_IRWXU,
    )
    .map_err(|errno| anyhow!("{name}: {errno}"))
}

fn read_retry(fd: RawFd, buf: &mut [u8]) -> anyhow::Result<usize> {
    loop {
        match read(fd, buf) {
            Ok(got) => return Ok(got),
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(anyhow!("read: {errno}")),
        }
    }
}
