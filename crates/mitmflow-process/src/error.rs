use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(
        "'{binary}' が見つからず、インストールにも失敗しました: {reason}\n\nヒント:\n  • pip install mitmproxy で手動インストールしてください\n  • binary-path 入力でバイナリの場所を指定できます"
    )]
    BinaryUnavailable { binary: PathBuf, reason: String },

    #[error("'{binary}' の起動に失敗しました: {reason}")]
    SpawnFailed { binary: PathBuf, reason: String },

    #[error(
        "プロキシが起動直後に終了しました（{status}）\n\nログ ({log_file}):\n{log}"
    )]
    ExitedEarly {
        status: String,
        log_file: PathBuf,
        log: String,
    },

    #[error("プロセス {pid} へのシグナル送信に失敗しました: {reason}")]
    SignalFailed { pid: u32, reason: String },

    #[error("コマンドの実行に失敗しました: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("この環境では未対応の操作です: {0}")]
    Unsupported(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] mitmflow_core::CoreError),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
