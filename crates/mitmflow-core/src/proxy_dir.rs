//! プロキシディレクトリの規約
//!
//! 1ジョブ分のキャプチャファイルとサイドカーファイルをすべて置く
//! 既知のディレクトリ。状態ストアが使えないフェーズでも、このディレクトリの
//! 中身だけで ProcessHandle を復元できるようにしている。

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// `RUNNER_TEMP` 配下に作るディレクトリ名
pub const PROXY_DIR_NAME: &str = "mitmproxy-logger-action";
pub const PID_FILE: &str = "mitmdump.pid";
pub const LOG_FILE: &str = "mitmdump.log";
pub const CACERT_FILE: &str = "mitmproxy-ca-cert.pem";
pub const STREAM_PATH_FILE: &str = "traffic_file_path.txt";
pub const PROXY_URL_FILE: &str = "proxy_url.txt";
pub const CURLRC_FILE: &str = ".curlrc";
pub const ARTIFACTS_DIR: &str = "artifacts";
/// キャプチャファイルの拡張子
pub const CAPTURE_EXTENSION: &str = "mitm";
/// キャプチャが存在しない場合に作るプレースホルダー
pub const EMPTY_CAPTURE_FILE: &str = "traffic_empty.mitm";

/// ファイル名に埋め込むタイムスタンプ（`2024-05-01T12-34-56` 形式）
pub fn timestamp_slug(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// ディレクトリ一覧の1エントリ（診断用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDirectory {
    root: PathBuf,
}

impl ProxyDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 既定のルート: `$RUNNER_TEMP/mitmproxy-logger-action`
    ///
    /// `RUNNER_TEMP` が無い場合は OS の一時ディレクトリを使う。
    pub fn default_root() -> PathBuf {
        let base = std::env::var_os("RUNNER_TEMP")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        base.join(PROXY_DIR_NAME)
    }

    /// 明示指定 → 記録済みパス → 既定ルート の順で決める
    pub fn locate(explicit: Option<&Path>, recorded: Option<PathBuf>) -> Self {
        if let Some(path) = explicit {
            debug!(dir = %path.display(), "Using explicit proxy directory");
            return Self::new(path);
        }
        if let Some(path) = recorded {
            debug!(dir = %path.display(), "Using proxy directory from state");
            return Self::new(path);
        }
        let path = Self::default_root();
        debug!(dir = %path.display(), "Using default proxy directory");
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// ディレクトリを作成する（既にあれば何もしない）
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| CoreError::io_at(&self.root, e))
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn cacert_file(&self) -> PathBuf {
        self.root.join(CACERT_FILE)
    }

    pub fn stream_path_file(&self) -> PathBuf {
        self.root.join(STREAM_PATH_FILE)
    }

    pub fn proxy_url_file(&self) -> PathBuf {
        self.root.join(PROXY_URL_FILE)
    }

    pub fn curlrc_file(&self) -> PathBuf {
        self.root.join(CURLRC_FILE)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    pub fn placeholder_capture_file(&self) -> PathBuf {
        self.root.join(EMPTY_CAPTURE_FILE)
    }

    /// 新しいキャプチャファイルのパス
    pub fn new_stream_file(&self, now: DateTime<Utc>) -> PathBuf {
        self.root.join(format!(
            "traffic_{}.{}",
            timestamp_slug(now),
            CAPTURE_EXTENSION
        ))
    }

    /// PIDファイルを読む。無い・壊れている場合は `None`
    pub fn read_pid(&self) -> Option<u32> {
        let path = self.pid_file();
        let content = std::fs::read_to_string(&path).ok()?;
        match content.trim().parse::<u32>() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed PID file");
                None
            }
        }
    }

    pub fn write_pid(&self, pid: u32) -> Result<()> {
        self.write_sidecar(PID_FILE, &pid.to_string())
    }

    /// PIDファイルを削除する。削除した場合は `true`
    pub fn remove_pid_file(&self) -> Result<bool> {
        let path = self.pid_file();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CoreError::io_at(path, e)),
        }
    }

    /// サイドカーファイルを読む（前後の空白を除去、空なら `None`）
    pub fn read_sidecar(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(name))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn write_sidecar(&self, name: &str, value: &str) -> Result<()> {
        let path = self.root.join(name);
        std::fs::write(&path, value).map_err(|e| CoreError::io_at(path, e))
    }

    /// ディレクトリ内のキャプチャファイル（新しい順）
    ///
    /// 更新日時が同じ場合はファイル名順。列挙順には依存しない。
    pub fn capture_files(&self) -> Vec<PathBuf> {
        let Some(root) = self.root.to_str() else {
            warn!(dir = %self.root.display(), "Proxy directory path is not valid UTF-8");
            return Vec::new();
        };
        let pattern = format!(
            "{}/*.{}",
            glob::Pattern::escape(root),
            CAPTURE_EXTENSION
        );

        let entries = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalid capture file pattern");
                return Vec::new();
            }
        };

        let mut files: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .map(|path| {
                let modified = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();

        files.sort_by(|(a_time, a_path), (b_time, b_path)| {
            b_time.cmp(a_time).then_with(|| a_path.cmp(b_path))
        });
        files.into_iter().map(|(_, path)| path).collect()
    }

    /// ディレクトリの中身（名前順）
    pub fn listing(&self) -> Vec<DirEntryInfo> {
        let Ok(read_dir) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut entries: Vec<DirEntryInfo> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let metadata = entry.metadata().ok();
                DirEntryInfo {
                    name: entry.file_name().to_string_lossy().to_string(),
                    size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
                    is_dir: metadata.map(|m| m.is_dir()).unwrap_or(false),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// 警告メッセージに添える一覧文字列
    pub fn describe(&self) -> String {
        if !self.exists() {
            return format!("{} (ディレクトリが存在しません)", self.root.display());
        }

        let entries = self.listing();
        if entries.is_empty() {
            return format!("{} (空)", self.root.display());
        }

        let items = entries
            .iter()
            .map(|e| {
                if e.is_dir {
                    format!("{}/", e.name)
                } else {
                    format!("{} ({} bytes)", e.name, e.size)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}: {}", self.root.display(), items)
    }
}
