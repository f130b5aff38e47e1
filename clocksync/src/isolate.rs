//! Process isolation for device queries.
//!
//! A driver that has seen a fault can leave the calling process unable to
//! touch the device again. Every device-facing operation therefore runs in a
//! throwaway child created with `fork`; the child writes one scalar into a
//! [`SharedScalar`] and exits, and the parent validates the exit before
//! trusting the value.

use std::io;
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error};

use crate::error::{ClockSyncError, Result};
use crate::shared::{SharedScalar, SharedValue};

/// Exit status of a child whose operation returned an error.
pub const EXIT_OPERATION_FAILED: i32 = 1;
/// Exit status of a child whose operation panicked.
pub const EXIT_PANICKED: i32 = 101;

/// Runs `op` in a forked child and returns the value it produced.
///
/// Fails if the buffer cannot be mapped, `fork` or `waitpid` fail, the child
/// is killed by a signal, or it exits with a non-zero status. A failed call
/// never returns whatever happens to be in the buffer.
///
/// The child only ever leaves through `_exit`, so `op` must not rely on
/// destructors of values owned by the caller.
///
/// Only the forking thread exists in the child. A lock another thread held
/// at the moment of `fork` stays held there for good, so if `op` allocates,
/// spawns threads or logs, fork before starting threads that hold such locks
/// for long stretches.
pub fn run_isolated<T, F>(op: F) -> Result<T>
where
    T: SharedValue,
    F: FnOnce() -> Result<T>,
{
    let slot = SharedScalar::<T>::allocate()?;

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(ClockSyncError::Fork(io::Error::last_os_error()));
    }

    if pid == 0 {
        let code = match panic::catch_unwind(AssertUnwindSafe(op)) {
            Ok(Ok(value)) => {
                slot.publish(value);
                0
            }
            Ok(Err(e)) => {
                error!("isolated operation failed: {}", e);
                EXIT_OPERATION_FAILED
            }
            Err(_) => EXIT_PANICKED,
        };
        log::logger().flush();
        unsafe { libc::_exit(code) };
    }

    let status = wait_for(pid)?;

    if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        error!("isolated child {} terminated by signal {}", pid, sig);
        return Err(ClockSyncError::ChildSignaled(sig));
    }
    if !libc::WIFEXITED(status) {
        error!("isolated child {} did not exit normally (status {:#x})", pid, status);
        return Err(ClockSyncError::ChildFailed(status));
    }
    let code = libc::WEXITSTATUS(status);
    if code != 0 {
        error!("isolated child {} exited with status {}", pid, code);
        return Err(ClockSyncError::ChildFailed(code));
    }

    debug!("isolated child {} exited cleanly", pid);
    Ok(slot.take())
}

fn wait_for(pid: libc::pid_t) -> Result<i32> {
    let mut status: i32 = 0;
    loop {
        let r = unsafe { libc::waitpid(pid, &mut status, 0) };
        if r == pid {
            return Ok(status);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        error!("waitpid({}) failed: {}", pid, err);
        return Err(ClockSyncError::Wait(err));
    }
}
