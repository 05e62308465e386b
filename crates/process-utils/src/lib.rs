//! Small process-related helpers shared across the workspace.
//!
//! Child processes spawned by the recorder are detached into their own process
//! group, so a Ctrl+C delivered to the terminal reaches only the parent. The
//! parent then decides when to forward an interrupt with [`send_interrupt`].

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Platform tweaks applied to commands before they are spawned.
pub trait CommandExt {
    /// Apply the Windows `CREATE_NO_WINDOW` flag. No-op elsewhere.
    fn no_window(&mut self) -> &mut Self;

    /// Start the child in a new process group so terminal signals are not
    /// forwarded to it automatically.
    fn detached(&mut self) -> &mut Self;
}

impl CommandExt for std::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt as _;
            self.creation_flags(CREATE_NO_WINDOW);
        }
        self
    }

    fn detached(&mut self) -> &mut Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            self.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt as _;
            self.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
        }
        self
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl CommandExt for tokio::process::Command {
    fn no_window(&mut self) -> &mut Self {
        self.as_std_mut().no_window();
        self
    }

    fn detached(&mut self) -> &mut Self {
        self.as_std_mut().detached();
        self
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Ask a running child to stop gracefully.
///
/// On unix this delivers `SIGINT`, which lets tools such as ytarchive finish
/// muxing what they already downloaded. A child that has already been reaped
/// is not an error. Other platforms fall back to a hard kill.
#[cfg(feature = "tokio")]
pub fn send_interrupt(child: &mut tokio::process::Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            return Ok(());
        };
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return Err(std::io::Error::other("pid out of range"));
        };
        // SAFETY: `kill` has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGINT) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

/// Wait for the child to exit.
///
/// A wait interrupted by a signal (the child being stopped and continued, or
/// the parent itself receiving one) is retried instead of being reported as
/// the final exit.
#[cfg(feature = "tokio")]
pub async fn wait_for_exit(
    child: &mut tokio::process::Child,
) -> std::io::Result<std::process::ExitStatus> {
    loop {
        match child.wait().await {
            Ok(status) => return Ok(status),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[tokio::test]
    async fn interrupt_stops_detached_child() {
        let mut child = tokio_command("sleep")
            .arg("30")
            .detached()
            .spawn()
            .unwrap();

        send_interrupt(&mut child).unwrap();
        let status = wait_for_exit(&mut child).await.unwrap();

        assert!(!status.success());
        assert_eq!(status.signal(), Some(libc::SIGINT));
    }

    #[tokio::test]
    async fn interrupt_after_exit_is_ok() {
        let mut child = tokio_command("true").spawn().unwrap();
        let status = wait_for_exit(&mut child).await.unwrap();
        assert!(status.success());

        send_interrupt(&mut child).unwrap();
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let mut child = tokio_command("false").detached().spawn().unwrap();
        let status = wait_for_exit(&mut child).await.unwrap();
        assert_eq!(status.code(), Some(1));
    }
}
