//! Process launching seam.

use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::config::CommandSpec;

/// Starts stage processes. Production code uses [`SystemLauncher`]; tests
/// substitute launchers that fail on purpose.
pub trait Launcher: Send + Sync {
    fn spawn(&self, command: &CommandSpec, cwd: &Path) -> io::Result<Child>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn spawn(&self, command: &CommandSpec, cwd: &Path) -> io::Result<Child> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so cancellation reaches every child of Allrun.
            cmd.process_group(0);
        }
        cmd.spawn()
    }
}

/// Launch errors worth another attempt.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ResourceBusy
    )
}

/// Terminate a process and everything in its group.
pub fn kill_tree(pid: u32) {
    #[cfg(unix)]
    {
        let group = format!("-{pid}");
        let _ = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    #[cfg(not(unix))]
    {
        let _ = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}
