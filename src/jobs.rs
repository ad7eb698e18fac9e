//! Registry of background-job PIDs.
//!
//! One writer runs on the main thread (insertions after a background
//! fork) and one inside the SIGCHLD handler (removals on reap). The
//! slots are single-word atomics and every main-thread mutation happens
//! with SIGCHLD blocked, so the two contexts never race.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

pub const MAX_JOBS: usize = 8;

const EMPTY: i32 = 0;

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicI32 = AtomicI32::new(EMPTY);
static SLOTS: [AtomicI32; MAX_JOBS] = [EMPTY_SLOT; MAX_JOBS];

/// Record a freshly spawned background PID in the first empty slot.
/// When the registry is full the job keeps running untracked.
///
/// Callers must hold SIGCHLD blocked from before the fork that produced
/// `pid` until this returns, so the reaper cannot observe the PID
/// before it is recorded.
pub fn insert(pid: Pid) {
    for slot in &SLOTS {
        if slot.load(Ordering::SeqCst) == EMPTY {
            slot.store(pid.as_raw(), Ordering::SeqCst);
            return;
        }
    }
}

/// Clear the slot holding `pid`; no-op if it is not tracked.
pub fn remove(pid: i32) {
    for slot in &SLOTS {
        if slot.load(Ordering::SeqCst) == pid {
            slot.store(EMPTY, Ordering::SeqCst);
            return;
        }
    }
}

/// Tracked PIDs in slot order.
pub fn snapshot() -> Vec<i32> {
    SLOTS
        .iter()
        .map(|slot| slot.load(Ordering::SeqCst))
        .filter(|pid| *pid != EMPTY)
        .collect()
}

/// Send SIGKILL to every tracked job. The slots are left in place; the
/// SIGCHLD reaper clears them once the kills are delivered.
pub fn kill_all() {
    for pid in snapshot() {
        // The job may have exited between the snapshot and the kill.
        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

/// SIGCHLD handler body: reap every child that has already exited,
/// announce it as `[<pid>]` and drop it from the registry.
///
/// Runs in signal-handler context, so it only uses async-signal-safe
/// primitives: `waitpid(WNOHANG)`, a hand-rolled decimal formatter and
/// a raw `write` to stdout.
pub fn reap_children() {
    let saved_errno = unsafe { *libc::__errno_location() };

    loop {
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }

        write_reaped(pid);
        remove(pid);
    }

    unsafe { *libc::__errno_location() = saved_errno };
}

// "[<pid>]\n" rendered without going through locale-aware streams.
fn write_reaped(pid: i32) {
    let mut buf = [0u8; 16];
    let mut i = buf.len();

    buf[i - 1] = b'\n';
    buf[i - 2] = b']';
    i -= 2;

    let mut val = pid;
    while val > 0 && i > 1 {
        i -= 1;
        buf[i] = b'0' + (val % 10) as u8;
        val /= 10;
    }
    i -= 1;
    buf[i] = b'[';

    let mut off = i;
    while off < buf.len() {
        let n = unsafe {
            libc::write(
                libc::STDOUT_FILENO,
                buf[off..].as_ptr() as *const libc::c_void,
                buf.len() - off,
            )
        };
        if n <= 0 {
            break;
        }
        off += n as usize;
    }
}
