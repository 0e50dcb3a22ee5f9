//! Small process-related helpers shared across the workspace.
//!
//! Converters are launched in their own process group so that a cancel can
//! take down the whole tree (ffmpeg may fork helpers, `magick` delegates to
//! external coders) instead of leaving orphans behind.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

/// Place a child process at the root of a new process group.
///
/// Pair with [`kill_tree`] to terminate the child together with everything it
/// spawned. On Windows this also implies `CREATE_NO_WINDOW`.
pub trait ProcessGroupExt {
    fn own_process_group(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

impl ProcessGroupExt for std::process::Command {
    fn own_process_group(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            self.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl ProcessGroupExt for tokio::process::Command {
    fn own_process_group(&mut self) {
        self.as_std_mut().own_process_group();
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a `tokio::process::Command` that runs in its own process group and
/// is killed if its handle is dropped.
#[cfg(feature = "tokio")]
pub fn tokio_group_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.own_process_group();
    cmd.kill_on_drop(true);
    cmd
}

/// Kill a child together with its process group (unix) or process tree
/// (Windows), then reap it.
///
/// Calling this on a child that already exited is not an error.
#[cfg(feature = "tokio")]
pub async fn kill_tree(child: &mut tokio::process::Child) -> std::io::Result<()> {
    if let Some(pid) = child.id() {
        kill_group(pid).await;
    }

    match child.kill().await {
        Ok(()) => Ok(()),
        // Already reaped.
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(e),
    }
}

/// Kill every process in the group led by `pid`.
///
/// Works after the leader itself has exited, as long as any member of its
/// group is still alive. Failures are logged, not returned.
#[cfg(all(feature = "tokio", unix))]
pub async fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions. The group id is the
    // pid of a child spawned with `process_group(0)`.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the group is already gone.
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, error = %err, "Failed to signal process group");
        }
    }
}

/// Kill the process tree rooted at `pid` with `taskkill /T`.
///
/// Failures are logged, not returned.
#[cfg(all(feature = "tokio", windows))]
pub async fn kill_group(pid: u32) {
    let result = tokio_command("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if !status.success() => {
            tracing::warn!(pid, code = ?status.code(), "taskkill did not succeed");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(pid, error = %e, "Failed to run taskkill"),
    }
}

#[cfg(all(feature = "tokio", not(any(unix, windows))))]
pub async fn kill_group(_pid: u32) {}

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn kill_tree_terminates_group() {
        let mut child = tokio_group_command("sh")
            .args(["-c", "sleep 30 & sleep 30; wait"])
            .spawn()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        kill_tree(&mut child).await.unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should be reaped promptly")
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn kill_group_reaches_orphaned_members() {
        use tokio::io::AsyncReadExt;

        // The background sleep keeps stderr open after the leader exits.
        let mut child = tokio_group_command("sh")
            .args(["-c", "sleep 30 & exit 0"])
            .stderr(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let mut stderr = child.stderr.take().unwrap();
        assert!(child.wait().await.unwrap().success());

        kill_group(pid).await;

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stderr.read_to_end(&mut rest))
            .await
            .expect("stderr should close once the group is killed")
            .unwrap();

        // Already gone is fine.
        kill_group(pid).await;
    }

    #[tokio::test]
    async fn kill_tree_after_exit_is_ok() {
        let mut child = tokio_group_command("true").spawn().unwrap();
        child.wait().await.unwrap();
        assert!(kill_tree(&mut child).await.is_ok());
    }
}
