use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("状態ファイルのパースに失敗しました: {path}\n理由: {message}")]
    StateParse { path: PathBuf, message: String },

    #[error("JSON エラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("無効な入力: {name}\n理由: {message}")]
    InvalidInput { name: String, message: String },

    #[error("未知の状態キー: {0}")]
    UnknownStateKey(String),

    #[error(
        "ホストファイルへの書き込みに失敗しました: {path}\n理由: {message}\n\nヒント:\n  • GitHub Actions 上で実行しているか確認してください\n  • ローカル実行時は --state-file を指定してください"
    )]
    HostFileWrite { path: PathBuf, message: String },
}

impl CoreError {
    pub(crate) fn io_at(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        CoreError::IoError {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
