//! キャプチャファイルの解決
//!
//! 以下の順に探し、前の段階で見つからなかった場合のみ次を試す:
//! 1. 状態ストアに記録されたパス
//! 2. `traffic_file_path.txt` サイドカー
//! 3. ディレクトリ内の `*.mitm`（新しい順の先頭）
//! 4. 空のプレースホルダーを作成
//!
//! 記録済みでも実在しないパスは「見つからなかった」扱い。

use crate::error::{CoreError, Result};
use crate::proxy_dir::{ProxyDirectory, STREAM_PATH_FILE};
use crate::state::{StateKey, StateStore};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// どの段階で見つかったか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    State,
    Sidecar,
    DirectoryScan,
    Placeholder,
}

impl fmt::Display for ResolvedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedFrom::State => write!(f, "state"),
            ResolvedFrom::Sidecar => write!(f, "sidecar"),
            ResolvedFrom::DirectoryScan => write!(f, "directory scan"),
            ResolvedFrom::Placeholder => write!(f, "placeholder"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub path: PathBuf,
    pub source: ResolvedFrom,
}

/// 既存のキャプチャファイルを探す（読み取りのみ）
pub fn locate(store: &dyn StateStore, dir: &ProxyDirectory) -> Option<ResolvedOutput> {
    if let Some(path) = store.get_path(StateKey::StreamFile) {
        if path.is_file() {
            return Some(ResolvedOutput {
                path,
                source: ResolvedFrom::State,
            });
        }
        debug!(path = %path.display(), "Recorded stream file does not exist");
    }

    if let Some(path) = dir.read_sidecar(STREAM_PATH_FILE).map(PathBuf::from) {
        if path.is_file() {
            return Some(ResolvedOutput {
                path,
                source: ResolvedFrom::Sidecar,
            });
        }
        debug!(path = %path.display(), "Stream file from sidecar does not exist");
    }

    let candidates = dir.capture_files();
    if candidates.len() > 1 {
        info!(
            count = candidates.len(),
            "Multiple capture files found, picking the most recently modified"
        );
    }
    candidates.into_iter().next().map(|path| ResolvedOutput {
        path,
        source: ResolvedFrom::DirectoryScan,
    })
}

/// 必ず実在するキャプチャファイルを返す
///
/// 何も見つからなければディレクトリごと作成し、0バイトの
/// プレースホルダーを書き込む。
pub fn resolve(store: &dyn StateStore, dir: &ProxyDirectory) -> Result<ResolvedOutput> {
    if let Some(found) = locate(store, dir) {
        debug!(path = %found.path.display(), source = %found.source, "Resolved capture file");
        return Ok(found);
    }

    info!(dir = %dir.path().display(), "No capture file found, creating an empty placeholder");
    dir.ensure()?;
    let path = dir.placeholder_capture_file();
    if !path.is_file() {
        std::fs::write(&path, b"").map_err(|e| CoreError::IoError {
            path: path.clone(),
            message: e.to_string(),
        })?;
    }

    Ok(ResolvedOutput {
        path,
        source: ResolvedFrom::Placeholder,
    })
}
