//! Process-level helpers: group isolation, signals, liveness

use std::io;

/// Signal sent to a worker (or its group)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Make the worker lead its own process group and, on Linux, die with the
/// thread that spawned it.
///
/// PDEATHSIG tracks the spawning thread; workers are only spawned from
/// runtime worker threads, which live as long as the runtime.
#[cfg(unix)]
pub(crate) fn isolate(cmd: &mut tokio::process::Command) {
    #[cfg(target_os = "linux")]
    let parent = std::process::id() as libc::pid_t;

    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }

            #[cfg(target_os = "linux")]
            {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                    return Err(io::Error::last_os_error());
                }
                // Parent died before prctl took effect; nobody will ever signal us
                if libc::getppid() != parent {
                    libc::_exit(1);
                }
            }

            Ok(())
        });
    }
}

/// Send `signal` to `pid`, or to the process group led by `pid`.
/// A process that is already gone is not an error.
#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, signal: Signal, whole_group: bool) -> io::Result<()> {
    let target = if whole_group {
        -(pid as libc::pid_t)
    } else {
        pid as libc::pid_t
    };

    if unsafe { libc::kill(target, signal.as_raw()) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Whether `pid` refers to a live (non-zombie) process
pub fn process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            // State is the first field after the parenthesised command name
            Ok(stat) => match stat.rfind(')') {
                Some(end) => !matches!(stat[end + 1..].trim_start().chars().next(), Some('Z' | 'X')),
                None => true,
            },
            Err(_) => false,
        }
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
            return true;
        }
        io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn test_reaped_process_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_isolated_child_leads_own_group() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "exit 7"]);
        isolate(&mut cmd);

        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap() as libc::pid_t;
        assert_eq!(unsafe { libc::getpgid(pid) }, pid);

        // The pre-exec hook let the command run instead of bailing out
        let status = child.wait().await.unwrap();
        assert_eq!(status.code(), Some(7));
    }

    #[test]
    fn test_signal_to_missing_group_is_ok() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(send_signal(pid, Signal::Kill, true).is_ok());
    }
}
