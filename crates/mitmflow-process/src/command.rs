//! 外部コマンド実行ヘルパー

use crate::error::{ProcessError, Result};
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::process::Command;

/// コマンドを実行して標準出力を返す。終了コードが0以外ならエラー
pub async fn run<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let args: Vec<_> = args
        .into_iter()
        .map(|a| a.as_ref().to_os_string())
        .collect();
    let shown = std::iter::once(program.to_string_lossy().to_string())
        .chain(args.iter().map(|a| a.to_string_lossy().to_string()))
        .collect::<Vec<_>>()
        .join(" ");

    tracing::debug!("Running: {}", shown);

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProcessError::CommandFailed {
            command: shown.clone(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessError::CommandFailed {
            command: shown,
            stderr: format!("{} ({})", stderr.trim(), output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// コマンドが実行可能かどうか（`--version` が成功するか）
pub async fn responds_to_version(program: impl AsRef<OsStr>) -> bool {
    run(program, ["--version"]).await.is_ok()
}
