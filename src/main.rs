mod builtins;
mod command;
mod engine;
mod errors;
mod frontend;
mod jobs;
mod signals;

use std::env;

use engine::{Engine, Flow, DBG_CMD};
use frontend::{write_to_stderr, write_to_stdout, Prompt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn help() -> anyhow::Result<()> {
    write_to_stdout(&format!(
        "Uso: simplesh [-d N] [-h]\n\
         \tshell simplesh v{VERSION}\n\
         \tOpciones:\n\
         \t-d N Establece el nivel de depuración a N.\n\
         \t-h   Ayuda\n"
    ))
}

// `-h` and any unrecognized flag print the usage text; the caller then
// exits 0.
fn parse_args() -> Option<u8> {
    let mut dbg = 0;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-d" => match args.next().and_then(|level| level.parse::<u8>().ok()) {
                Some(level) => dbg = level,
                None => return None,
            },
            _ => return None,
        }
    }

    Some(dbg)
}

fn main() -> anyhow::Result<()> {
    signals::install()?;

    let Some(dbg) = parse_args() else {
        help()?;
        return Ok(());
    };

    // `cd -` must fail until the first `cd` of this session.
    env::remove_var("OLDPWD");

    let engine = Engine::new(dbg);
    let prompt = Prompt::new();

    while let Some(line) = frontend::read_line(&prompt)? {
        let cmd = match command::parser::parse(&line) {
            Ok(cmd) => cmd,
            Err(err) => {
                write_to_stderr(&format!("{err}\n"))?;
                continue;
            }
        };

        if dbg & DBG_CMD != 0 {
            write_to_stderr(&format!("simplesh: árbol: {cmd}\n"))?;
        }

        match engine.run(&cmd)? {
            Flow::Exit => break,
            Flow::Continue => {}
        }
    }

    Ok(())
}
