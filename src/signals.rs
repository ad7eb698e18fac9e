//! Process-wide signal policy.
//!
//! Installed once at startup: SIGINT is blocked so the shell survives
//! Ctrl-C at the prompt, SIGQUIT is ignored, and SIGCHLD runs the
//! background-job reaper. The executor serializes against the reaper by
//! blocking SIGCHLD around every fork..wait window via [`ChldBlock`].

use nix::sys::signal::{sigprocmask, signal, SigHandler, SigSet, SigmaskHow, Signal};
use signal_hook::consts;

use crate::{frontend::write_to_stderr, jobs};

pub fn install() -> anyhow::Result<()> {
    let mut sigint = SigSet::empty();
    sigint.add(Signal::SIGINT);
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&sigint), None)?;

    unsafe { signal(Signal::SIGQUIT, SigHandler::SigIgn) }?;

    unsafe { signal_hook::low_level::register(consts::SIGCHLD, jobs::reap_children) }?;

    Ok(())
}

/// Blocks SIGCHLD for the extent of the guard's scope; the previous
/// mask is restored on drop, so guards nest correctly.
pub struct ChldBlock {
    prev: SigSet,
}

impl ChldBlock {
    pub fn new() -> nix::Result<Self> {
        let mut chld = SigSet::empty();
        chld.add(Signal::SIGCHLD);

        let mut prev = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&chld), Some(&mut prev))?;

        Ok(Self { prev })
    }
}

impl Drop for ChldBlock {
    fn drop(&mut self) {
        // A mask that cannot be restored leaves the reaper disabled for
        // the rest of the session; treat it like any other sigprocmask
        // failure and abort.
        if sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.prev), None).is_err() {
            let _ = write_to_stderr("simplesh: sigprocmask: no se pudo restaurar la máscara\n");
            std::process::exit(1);
        }
    }
}
