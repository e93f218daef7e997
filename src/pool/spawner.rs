// src/pool/spawner.rs
// Injectable command launcher for child MCP processes

use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// A freshly launched child with all three pipes captured.
pub struct SpawnedChild {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Launcher seam. Production uses `ProcessSpawner`; tests substitute their
/// own implementation instead of mutating any global.
pub trait Spawner: Send + Sync {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> std::io::Result<SpawnedChild>;
}

/// Spawns real OS processes with the descriptor env overlaid on the
/// gateway's own environment.
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(
        &self,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> std::io::Result<SpawnedChild> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;

        Ok(SpawnedChild {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> std::io::Result<T> {
    pipe.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("child {name} pipe was not captured"),
        )
    })
}
