use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Capture file not found: {0}")]
    CaptureNotFound(PathBuf),

    #[error("Failed to write archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Upload of artifact '{name}' failed: {reason}")]
    UploadFailed {
        name: String,
        reason: String,
        listing: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] mitmflow_core::CoreError),
}

impl ArtifactError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            ArtifactError::UploadFailed {
                name,
                reason,
                listing,
            } => {
                format!(
                    "アーティファクト '{}' のアップロードに失敗しました: {}\n\
                     \n\
                     artifacts ディレクトリの内容:\n{}",
                    name, reason, listing
                )
            }
            ArtifactError::EncryptionUnavailable(msg) => {
                format!(
                    "暗号化を実行できません: {}\n\
                     \n\
                     openssl がインストールされているか確認してください。",
                    msg
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;
