//! Runs the helper programs the platform backends shell out to.

use std::{process::Stdio, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use tokio::{io::AsyncWriteExt, process::Command};

/// Runs `argv`, optionally feeding `input` on stdin, and returns stdout.
/// Fails on a non-zero exit, and kills the child if `timeout` elapses.
pub async fn run_command(argv: &[String], input: Option<&[u8]>, timeout: Duration) -> Result<Vec<u8>> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command line"))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start '{program}'"))?;

    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => {
            let bytes = bytes.to_vec();
            Some(tokio::spawn(async move {
                stdin.write_all(&bytes).await?;
                stdin.shutdown().await
            }))
        }
        _ => None,
    };

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| anyhow!("'{program}' timed out after {}ms", timeout.as_millis()))?
        .with_context(|| format!("failed to collect output of '{program}'"))?;

    if let Some(writer) = writer {
        writer
            .await
            .context("stdin writer task failed to join")?
            .with_context(|| format!("failed to write stdin of '{program}'"))?;
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("'{program}' exited with {}: {}", output.status, stderr.trim());
    }

    Ok(output.stdout)
}

/// Whether running `argv` failed because the program does not exist.
pub fn is_missing_program(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[tokio::test]
    async fn test_pipes_stdin_to_stdout() {
        let out = run_command(&argv(&["cat"]), Some(b"hello"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let err = run_command(&argv(&["sh", "-c", "echo boom >&2; exit 3"]), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_program_is_detected() {
        let err = run_command(&argv(&["definitely-not-a-real-binary-xyz"]), None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(is_missing_program(&err));
    }

    #[tokio::test]
    async fn test_empty_command_line() {
        assert!(run_command(&[], None, Duration::from_secs(1)).await.is_err());
    }
}
