//! アーティファクトのアップロード
//!
//! 実際の転送先は CI ホストの機能に依存するため、トレイトで抽象化する。
//! 同梱の実装はディレクトリへのコピー。

use crate::error::{ArtifactError, Result};
use std::path::{Path, PathBuf};

/// アップロード結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub name: String,
    pub location: PathBuf,
    pub files: Vec<String>,
    pub bytes: u64,
}

pub trait ArtifactStore {
    /// `files`（すべて `root` 配下）を `name` という1つのアーティファクトとして保存する
    fn upload(&self, name: &str, root: &Path, files: &[PathBuf]) -> Result<UploadReceipt>;
}

/// `<base>/<name>/` へファイルをコピーするストア
///
/// ローカルへの保存のみで、CI ホストのアーティファクトサービスには送らない。
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    base: PathBuf,
}

impl DirectoryArtifactStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn upload(&self, name: &str, root: &Path, files: &[PathBuf]) -> Result<UploadReceipt> {
        let failed = |reason: String| ArtifactError::UploadFailed {
            name: name.to_string(),
            reason,
            listing: String::new(),
        };

        if files.is_empty() {
            return Err(failed("アップロードするファイルがありません".to_string()));
        }

        let location = self.base.join(name);
        std::fs::create_dir_all(&location)
            .map_err(|e| failed(format!("{}: {}", location.display(), e)))?;

        let mut uploaded = Vec::with_capacity(files.len());
        let mut bytes = 0;
        for file in files {
            let relative = file.strip_prefix(root).unwrap_or(file);
            let Some(file_name) = relative.file_name() else {
                return Err(failed(format!("不正なファイルパス: {}", file.display())));
            };
            let dest = location.join(file_name);
            bytes += std::fs::copy(file, &dest)
                .map_err(|e| failed(format!("{}: {}", file.display(), e)))?;
            uploaded.push(file_name.to_string_lossy().to_string());
        }

        tracing::info!(
            artifact = name,
            location = %location.display(),
            files = uploaded.len(),
            bytes,
            "Saved artifact to local directory"
        );

        Ok(UploadReceipt {
            name: name.to_string(),
            location,
            files: uploaded,
            bytes,
        })
    }
}
