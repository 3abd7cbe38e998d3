//! Spawning and tearing down the tsserver process

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::time::{timeout, Duration};
use tsmill_config::TsServerConfig;
use tsmill_foundation::{TsMillError, TsMillResult};

#[cfg(unix)]
const PATH_SEP: &str = ":";
#[cfg(windows)]
const PATH_SEP: &str = ";";

/// Spawn the configured tsserver command with piped stdio, rooted at `root`.
///
/// On Unix the child leads its own process group so [`terminate`] can take
/// down the typings installer tsserver forks.
pub fn spawn(config: &TsServerConfig, root: &Path) -> TsMillResult<Child> {
    let (program, args) = config
        .command
        .split_first()
        .ok_or_else(|| TsMillError::config("tsserver.command cannot be empty"))?;

    let augmented_path = augmented_path(root);
    tracing::debug!(
        command = %program,
        args = ?args,
        root = %root.display(),
        "Spawning tsserver"
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("PATH", augmented_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(root)
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        // SAFETY: setpgid is async-signal-safe and touches only the child
        unsafe {
            cmd.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }
    }

    cmd.spawn().map_err(|e| {
        tracing::error!(command = %program, error = %e, "Failed to spawn tsserver");
        TsMillError::Io {
            message: format!(
                "Failed to start tsserver '{}': {}",
                config.command.join(" "),
                e
            ),
            path: Some(root.to_path_buf()),
            source: Some(e),
        }
    })
}

/// Kill the process (group on Unix) and reap it
pub async fn terminate(mut child: Child) {
    let pid = child.id();

    #[cfg(unix)]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "killpg failed, falling back to kill");
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!(pid = ?pid, error = %e, "tsserver already exited");
    }

    match timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(pid = ?pid, exit_status = ?status, "tsserver reaped"),
        Ok(Err(e)) => tracing::warn!(pid = ?pid, error = %e, "Failed to wait for tsserver"),
        Err(_) => tracing::warn!(pid = ?pid, "Timeout waiting for tsserver to exit"),
    }

    #[cfg(unix)]
    if let Some(pid) = pid {
        reap_group(pid);
    }
}

/// Reap children left in the tsserver process group (typings installer)
#[cfg(unix)]
fn reap_group(pid: u32) {
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(-(pid as i32));
    let mut reaped = 0;
    loop {
        match waitpid(pgid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => reaped += 1,
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            _ => {}
        }
    }
    if reaped > 0 {
        tracing::debug!(reaped, pgid = pid, "Reaped tsserver process group children");
    }
}

/// PATH with the project's local `node_modules/.bin` and the npm global
/// prefix in front, so `tsserver`/`npx` resolve to the project's TypeScript
fn augmented_path(root: &Path) -> String {
    let current = std::env::var("PATH").unwrap_or_default();

    let mut additions: Vec<PathBuf> = vec![root.join("node_modules").join(".bin")];
    if let Ok(prefix) = std::env::var("NPM_CONFIG_PREFIX") {
        additions.push(PathBuf::from(prefix).join("bin"));
    }

    let mut parts: Vec<String> = additions
        .into_iter()
        .filter(|p| p.exists())
        .map(|p| p.display().to_string())
        .collect();
    if !current.is_empty() {
        parts.push(current);
    }
    parts.join(PATH_SEP)
}
