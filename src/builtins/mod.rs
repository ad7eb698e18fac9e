pub mod psplit;

use std::env;
use std::path::Path;

use nix::unistd::{chdir, getcwd};

use crate::{
    command::ExecCmd,
    engine::Flow,
    errors::ShellError,
    frontend::{write_to_stderr, write_to_stdout},
    jobs,
};

const BUILTIN_COMMANDS: [&str; 5] = ["cwd", "exit", "cd", "psplit", "bjobs"];

pub fn is_builtin(cmd: &str) -> bool {
    BUILTIN_COMMANDS.contains(&cmd)
}

/// Run a built-in inside the shell process. `Flow::Exit` is only ever
/// produced by `exit` and unwinds the REPL cleanly; usage errors are
/// reported on stderr and yield `Flow::Continue`.
pub fn run(ecmd: &ExecCmd) -> anyhow::Result<Flow> {
    match ecmd.argv[0] {
        "cwd" => run_cwd(),
        "exit" => Ok(Flow::Exit),
        "cd" => run_cd(ecmd),
        "bjobs" => run_bjobs(ecmd),
        "psplit" => psplit::run(ecmd),
        other => Err(ShellError::Internal(format!("'{other}' no es un comando interno")).into()),
    }
}

fn run_cwd() -> anyhow::Result<Flow> {
    match getcwd() {
        Ok(path) => write_to_stdout(&format!("cwd: {}\n", path.display()))?,
        Err(errno) => write_to_stderr(&format!("cwd: getcwd: {errno}\n"))?,
    }

    Ok(Flow::Continue)
}

/// `cd` with no arguments goes to `$HOME`; `cd -` to `$OLDPWD`.
/// `OLDPWD` is updated even when the chdir itself fails.
fn run_cd(ecmd: &ExecCmd) -> anyhow::Result<Flow> {
    if ecmd.argv.len() > 2 {
        write_to_stderr("cd: Demasiados argumentos\n")?;
        return Ok(Flow::Continue);
    }

    let cwd = match getcwd() {
        Ok(path) => path,
        Err(errno) => {
            write_to_stderr(&format!("cd: getcwd: {errno}\n"))?;
            return Ok(Flow::Continue);
        }
    };

    match ecmd.argv.get(1).copied() {
        None => {
            let Some(home) = env::var_os("HOME") else {
                write_to_stderr("cd: Variable HOME no definida\n")?;
                return Ok(Flow::Continue);
            };
            env::set_var("OLDPWD", &cwd);
            if let Err(errno) = chdir(Path::new(&home)) {
                write_to_stderr(&format!("cd: {}: {errno}\n", home.to_string_lossy()))?;
            }
        }
        Some("-") => {
            let Some(oldpwd) = env::var_os("OLDPWD") else {
                write_to_stderr("cd: Variable OLDPWD no definida\n")?;
                return Ok(Flow::Continue);
            };
            env::set_var("OLDPWD", &cwd);
            if let Err(errno) = chdir(Path::new(&oldpwd)) {
                write_to_stderr(&format!("cd: {}: {errno}\n", oldpwd.to_string_lossy()))?;
            }
        }
        Some(dir) => {
            env::set_var("OLDPWD", &cwd);
            if chdir(Path::new(dir)).is_err() {
                write_to_stderr(&format!("cd: No existe el directorio '{dir}'\n"))?;
            }
        }
    }

    Ok(Flow::Continue)
}

fn help_bjobs() -> &'static str {
    "Uso: bjobs [-k] [-h]\n\
     \tOpciones:\n\
     \t-k Mata todos los procesos en segundo plano.\n\
     \t-h Ayuda\n"
}

fn run_bjobs(ecmd: &ExecCmd) -> anyhow::Result<Flow> {
    let mut flag_k = false;

    for arg in &ecmd.argv[1..] {
        match *arg {
            "-k" => flag_k = true,
            "-h" => {
                write_to_stdout(help_bjobs())?;
                return Ok(Flow::Continue);
            }
            other => {
                write_to_stderr(&format!("bjobs: Opción '{other}' no válida\n"))?;
                write_to_stderr(help_bjobs())?;
                return Ok(Flow::Continue);
            }
        }
    }

    if flag_k {
        // Removal is deferred to the SIGCHLD reaper.
        jobs::kill_all();
    } else {
        for pid in jobs::snapshot() {
            write_to_stdout(&format!("[{pid}]\n"))?;
        }
    }

    Ok(Flow::Continue)
}
