use colored::Colorize;
use nix::unistd::{getcwd, getuid, User};

use super::write_to_stdout;

/// `<user>@<basename-of-cwd>> `. The user is resolved once; the
/// directory is re-read on every render so `cd` is reflected.
pub struct Prompt {
    user: String,
}

impl Prompt {
    pub fn new() -> Self {
        let user = User::from_uid(getuid())
            .ok()
            .flatten()
            .map(|user| user.name)
            .unwrap_or_else(|| "?".into());

        Self { user }
    }

    pub fn render(&self) -> anyhow::Result<()> {
        let dir = match getcwd() {
            Ok(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "/".into()),
            Err(_) => "?".into(),
        };

        let letter = format!("{}@{}> ", self.user, dir);
        write_to_stdout(&format!("{}", letter.green()))?;

        Ok(())
    }
}
