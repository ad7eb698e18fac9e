// Here we try to not use println as it can
// panic, more here:
// https://github.com/BurntSushi/advent-of-code/issues/17

mod prompt;

pub use prompt::Prompt;

use std::io::{self, BufRead, Write};

pub fn write_to_stdout(output: &str) -> anyhow::Result<()> {
    io::stdout().write_all(output.as_bytes())?;

    // Flushing is important because:
    // https://stackoverflow.com/questions/34993744/why-does-this-read-input-before-printing
    io::stdout().flush()?;

    Ok(())
}

pub fn write_to_stderr(output: &str) -> anyhow::Result<()> {
    io::stderr().write_all(output.as_bytes())?;
    io::stderr().flush()?;

    Ok(())
}

/// Render the prompt and read one command line. Returns `None` once
/// stdin reaches end-of-file.
pub fn read_line(prompt: &Prompt) -> anyhow::Result<Option<String>> {
    prompt.render()?;

    let mut input_str = String::new();
    let n = io::stdin().lock().read_line(&mut input_str)?;
    if n == 0 {
        return Ok(None);
    }

    Ok(Some(input_str))
}
