//! キャプチャのパッケージング
//!
//! 圧縮 → (任意) 暗号化 → ログの同梱 → アップロード の順に行う。
//! 暗号化の失敗は警告に留め、アップロードの失敗だけをエラーとする。

use crate::archive::ArchiveBuilder;
use crate::encrypt::{Encryptor, OpensslEncryptor, encrypted_path};
use crate::error::{ArtifactError, Result};
use crate::upload::{ArtifactStore, DirectoryArtifactStore, UploadReceipt};
use chrono::{DateTime, Utc};
use mitmflow_core::{ProxyDirectory, timestamp_slug};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// アーティファクト名の接頭辞
pub const ARTIFACT_PREFIX: &str = "mitmproxy_traffic";

/// `mitmproxy_traffic_<timestamp>`
pub fn artifact_name(now: DateTime<Utc>) -> String {
    format!("{}_{}", ARTIFACT_PREFIX, timestamp_slug(now))
}

#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub capture: PathBuf,
    pub log_file: Option<PathBuf>,
    pub artifacts_dir: PathBuf,
    pub passphrase: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PackageReport {
    pub artifact_name: String,
    /// アップロード対象になったアーカイブ（暗号化済みなら `.enc`）
    pub archive: PathBuf,
    pub encrypted: bool,
    pub files: Vec<PathBuf>,
    /// 呼び出し側で警告として表示するメッセージ
    pub warnings: Vec<String>,
    pub receipt: UploadReceipt,
}

pub struct Packager<E = OpensslEncryptor, A = DirectoryArtifactStore> {
    encryptor: E,
    store: A,
}

impl<A: ArtifactStore> Packager<OpensslEncryptor, A> {
    pub fn with_store(store: A) -> Self {
        Self::new(OpensslEncryptor::default(), store)
    }
}

impl<E: Encryptor, A: ArtifactStore> Packager<E, A> {
    pub fn new(encryptor: E, store: A) -> Self {
        Self { encryptor, store }
    }

    /// アーカイブを作成し、暗号化・ログ同梱を行う（アップロードはしない）
    ///
    /// 戻り値は (アップロード対象のアーカイブ, 暗号化したか, 警告)。
    pub fn prepare(&self, request: &PackageRequest) -> Result<(PathBuf, bool, Vec<String>)> {
        let mut warnings = Vec::new();
        std::fs::create_dir_all(&request.artifacts_dir)?;
        clear_previous(&request.artifacts_dir)?;

        let name = artifact_name(request.timestamp);
        let archive = request.artifacts_dir.join(format!("{}.tar.gz", name));
        let size = ArchiveBuilder::create(&request.capture, &archive)?;
        info!(archive = %archive.display(), size, "Compressed capture");

        let (archive, encrypted) = match request.passphrase.as_deref().filter(|p| !p.is_empty()) {
            Some(passphrase) => self.encrypt_archive(archive, passphrase, &mut warnings),
            None => {
                warnings.push(
                    "passphrase が指定されていないため、キャプチャは暗号化されずにアップロードされます"
                        .to_string(),
                );
                (archive, false)
            }
        };

        if let Some(log_file) = request.log_file.as_deref().filter(|p| p.is_file()) {
            if let Some(file_name) = log_file.file_name() {
                std::fs::copy(log_file, request.artifacts_dir.join(file_name))?;
            }
        }

        Ok((archive, encrypted, warnings))
    }

    fn encrypt_archive(
        &self,
        archive: PathBuf,
        passphrase: &str,
        warnings: &mut Vec<String>,
    ) -> (PathBuf, bool) {
        let output = encrypted_path(&archive);
        match self.encryptor.encrypt(&archive, &output, passphrase) {
            Ok(()) => {
                if let Err(e) = std::fs::remove_file(&archive) {
                    warn!(archive = %archive.display(), error = %e, "Failed to remove plain archive");
                }
                info!(archive = %output.display(), "Encrypted archive");
                (output, true)
            }
            Err(e) => {
                warn!(error = %e, "Encryption failed, keeping unencrypted archive");
                warnings.push(format!(
                    "暗号化に失敗したため、暗号化されていないアーカイブをアップロードします: {}",
                    e.user_message()
                ));
                (archive, false)
            }
        }
    }

    /// パッケージングからアップロードまでを行う
    pub fn package(&self, request: &PackageRequest) -> Result<PackageReport> {
        let (archive, encrypted, warnings) = self.prepare(request)?;
        let name = artifact_name(request.timestamp);
        let files = artifact_files(&request.artifacts_dir)?;

        let receipt = self
            .store
            .upload(&name, &request.artifacts_dir, &files)
            .map_err(|e| with_listing(e, &request.artifacts_dir))?;

        Ok(PackageReport {
            artifact_name: name,
            archive,
            encrypted,
            files,
            warnings,
            receipt,
        })
    }
}

/// artifacts ディレクトリ直下のファイル（名前順）
pub fn artifact_files(artifacts_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(artifacts_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// 以前の実行で残ったファイルを消す（今回の成果物だけをアップロードするため）
fn clear_previous(artifacts_dir: &Path) -> Result<()> {
    for stale in artifact_files(artifacts_dir)? {
        info!(file = %stale.display(), "Removing artifact from previous run");
        std::fs::remove_file(&stale)?;
    }
    Ok(())
}

/// アップロード失敗に artifacts ディレクトリの一覧を添える
fn with_listing(error: ArtifactError, artifacts_dir: &Path) -> ArtifactError {
    let listing = ProxyDirectory::new(artifacts_dir).describe();
    match error {
        ArtifactError::UploadFailed { name, reason, .. } => ArtifactError::UploadFailed {
            name,
            reason,
            listing,
        },
        other => ArtifactError::UploadFailed {
            name: artifacts_dir.display().to_string(),
            reason: other.to_string(),
            listing,
        },
    }
}
