//! プロキシプロセスの起動
//!
//! ランナーのステップが終わっても生き続けるよう、親から切り離して起動する。
//! 起動後は PID・キャプチャファイル・プロキシURL を状態ストアと
//! サイドカーファイルの両方に残す。

use crate::error::{ProcessError, Result};
use crate::install;
use chrono::Utc;
use mitmflow_core::{ListenAddr, ProcessHandle, ProxyDirectory, StateStore};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

/// 起動後、生存確認までの待ち時間
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// プロキシのバイナリ（PATH 上の名前か絶対パス）
    pub binary: PathBuf,
    pub settle_delay: Duration,
    /// 見つからない場合に pip でインストールするか
    pub install_missing: bool,
}

impl LaunchOptions {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            install_missing: true,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

pub struct ProxyLauncher {
    options: LaunchOptions,
}

impl ProxyLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }

    /// プロキシの起動引数
    fn proxy_args(listen: &ListenAddr, stream_file: &Path, dir: &ProxyDirectory) -> Vec<String> {
        vec![
            "--listen-host".to_string(),
            listen.host.clone(),
            "--listen-port".to_string(),
            listen.port.clone(),
            "--save-stream-file".to_string(),
            stream_file.to_string_lossy().to_string(),
            "--set".to_string(),
            format!("confdir={}", dir.path().display()),
        ]
    }

    /// プロキシを起動し、識別情報を保存する
    pub async fn launch(
        &self,
        listen: &ListenAddr,
        dir: &ProxyDirectory,
        store: &mut dyn StateStore,
    ) -> Result<ProcessHandle> {
        let binary = &self.options.binary;

        if self.options.install_missing {
            install::ensure_binary(binary).await?;
        }

        dir.ensure()?;
        let stream_file = dir.new_stream_file(Utc::now());
        let log_file = dir.log_file();
        let args = Self::proxy_args(listen, &stream_file, dir);

        info!(
            binary = %binary.display(),
            listen = %listen,
            stream_file = %stream_file.display(),
            "Starting proxy"
        );

        let mut child = spawn_detached(binary, &args, &log_file)?;
        let pid = child.id();
        dir.write_pid(pid)?;
        debug!(pid, pid_file = %dir.pid_file().display(), "Wrote PID file");

        tokio::time::sleep(self.options.settle_delay).await;

        if let Some(status) = child.try_wait()? {
            let log = std::fs::read_to_string(&log_file).unwrap_or_default();
            // 起動に失敗したプロセスの PID は残さない
            let _ = dir.remove_pid_file();
            return Err(ProcessError::ExitedEarly {
                status: status.to_string(),
                log_file,
                log,
            });
        }

        let mut handle = ProcessHandle {
            pid,
            listen: listen.clone(),
            stream_file,
            log_file,
            pid_file: dir.pid_file(),
            proxy_url: listen.proxy_url(),
        };
        handle.persist(store, dir)?;

        info!(pid, proxy_url = %handle.proxy_url, "Proxy is running");
        Ok(handle)
    }
}

/// 標準出力・標準エラーをログファイルに追記する形で、親から切り離して起動する
fn spawn_detached(binary: &Path, args: &[String], log_file: &Path) -> Result<Child> {
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    let log_err = log.try_clone()?;

    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    detach(&mut command);

    command.spawn().map_err(|e| ProcessError::SpawnFailed {
        binary: binary.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // 新しいプロセスグループにしてジョブ制御のシグナルを受けないようにする
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
