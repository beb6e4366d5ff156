//! フェーズ間の状態受け渡し
//!
//! pre / main / post の各フェーズは独立したプロセスとして起動されるため、
//! メモリ上の共有は一切できない。ジョブ単位で永続化されるキーバリューストアを
//! 経由して ProcessHandle の情報を引き継ぐ。
//!
//! キーごとに書き込みポリシーを明示する:
//! - `proxy-url` は最初の書き込みが優先される（後から再計算しない）
//! - それ以外は最後の書き込みが優先される

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const STATE_VERSION: u32 = 1;

/// 状態ストアのキー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Enabled,
    ListenHost,
    ListenPort,
    TempDir,
    StreamFile,
    Pid,
    ProxyUrl,
    CacertPath,
    InstallCacert,
    SetEnvvars,
    BinaryPath,
}

/// キーの書き込みポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// 既に値がある場合は上書きしない
    FirstWriterWins,
    /// 常に上書きする
    LastWriterWins,
}

impl StateKey {
    pub const ALL: [StateKey; 11] = [
        StateKey::Enabled,
        StateKey::ListenHost,
        StateKey::ListenPort,
        StateKey::TempDir,
        StateKey::StreamFile,
        StateKey::Pid,
        StateKey::ProxyUrl,
        StateKey::CacertPath,
        StateKey::InstallCacert,
        StateKey::SetEnvvars,
        StateKey::BinaryPath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Enabled => "enabled",
            StateKey::ListenHost => "listen-host",
            StateKey::ListenPort => "listen-port",
            StateKey::TempDir => "temp-dir",
            StateKey::StreamFile => "stream-file",
            StateKey::Pid => "pid",
            StateKey::ProxyUrl => "proxy-url",
            StateKey::CacertPath => "cacert-path",
            StateKey::InstallCacert => "install-cacert",
            StateKey::SetEnvvars => "set-envvars",
            StateKey::BinaryPath => "binary-path",
        }
    }

    pub fn policy(&self) -> WritePolicy {
        match self {
            StateKey::ProxyUrl => WritePolicy::FirstWriterWins,
            _ => WritePolicy::LastWriterWins,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        StateKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStateKey(s.to_string()))
    }
}

/// ジョブ単位の永続キーバリューストア
///
/// 空文字列は「値なし」として扱う。ホスト側の状態 API は未設定と空文字列を
/// 区別しないため。
pub trait StateStore {
    fn get(&self, key: StateKey) -> Option<String>;

    /// ポリシーを無視して書き込む
    fn put(&mut self, key: StateKey, value: &str) -> Result<()>;

    /// キーのポリシーに従って書き込む
    ///
    /// 書き込んだ場合は `true`、既存値を優先した場合は `false` を返す。
    fn record(&mut self, key: StateKey, value: &str) -> Result<bool> {
        if key.policy() == WritePolicy::FirstWriterWins {
            if let Some(existing) = self.get(key) {
                tracing::debug!(
                    key = %key,
                    existing = %existing,
                    "Keeping first recorded value"
                );
                return Ok(false);
            }
        }
        self.put(key, value)?;
        Ok(true)
    }

    /// 値があれば `u32` として読む（PID用）
    fn get_u32(&self, key: StateKey) -> Option<u32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// 値があればパスとして読む
    fn get_path(&self, key: StateKey) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }
}

impl<S: StateStore + ?Sized> StateStore for &mut S {
    fn get(&self, key: StateKey) -> Option<String> {
        (**self).get(key)
    }

    fn put(&mut self, key: StateKey, value: &str) -> Result<()> {
        (**self).put(key, value)
    }
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn get(&self, key: StateKey) -> Option<String> {
        (**self).get(key)
    }

    fn put(&mut self, key: StateKey, value: &str) -> Result<()> {
        (**self).put(key, value)
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// メモリ上のストア（テスト・単一プロセス用）
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    values: HashMap<StateKey, String>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: StateKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: StateKey) -> Option<String> {
        non_empty(self.values.get(&key))
    }

    fn put(&mut self, key: StateKey, value: &str) -> Result<()> {
        self.values.insert(key, value.to_string());
        Ok(())
    }
}

/// 状態ファイルの内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// ファイルフォーマットのバージョン
    pub version: u32,
    /// 最終更新日時
    pub updated_at: DateTime<Utc>,
    /// キーと値
    pub values: BTreeMap<String, String>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            values: BTreeMap::new(),
        }
    }
}

/// JSON ファイルに永続化するストア
///
/// GitHub Actions 以外（ローカル実行や結合テスト）でフェーズを跨いで
/// 状態を引き継ぐために使う。書き込みのたびにファイル全体を保存する。
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    state: StateFile,
}

impl JsonStateStore {
    /// 既存ファイルを読み込む。存在しなければ空の状態から始める
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "State file not found, starting empty");
            return Ok(Self {
                path,
                state: StateFile::default(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|e| CoreError::io_at(&path, e))?;
        let state: StateFile =
            serde_json::from_str(&content).map_err(|e| CoreError::StateParse {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if state.version > STATE_VERSION {
            return Err(CoreError::StateParse {
                path,
                message: format!(
                    "バージョン {} はサポート外です（対応: {}）",
                    state.version, STATE_VERSION
                ),
            });
        }

        tracing::debug!(
            path = %path.display(),
            entries = state.values.len(),
            "Loaded state file"
        );
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CoreError::io_at(parent, e))?;
            }
        }
        let content = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.path, content).map_err(|e| CoreError::io_at(&self.path, e))?;
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn get(&self, key: StateKey) -> Option<String> {
        non_empty(self.state.values.get(key.as_str()))
    }

    fn put(&mut self, key: StateKey, value: &str) -> Result<()> {
        self.state
            .values
            .insert(key.as_str().to_string(), value.to_string());
        self.state.updated_at = Utc::now();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_round_trip_names() {
        for key in StateKey::ALL {
            assert_eq!(key.as_str().parse::<StateKey>().unwrap(), key);
        }
        assert!("traffic-file".parse::<StateKey>().is_err());
    }

    #[test]
    fn test_proxy_url_first_writer_wins() {
        let mut store = MemoryStateStore::new();

        assert!(store.record(StateKey::ProxyUrl, "http://127.0.0.1:8080").unwrap());
        assert!(!store.record(StateKey::ProxyUrl, "http://0.0.0.0:9090").unwrap());
        assert_eq!(
            store.get(StateKey::ProxyUrl).as_deref(),
            Some("http://127.0.0.1:8080")
        );
    }

    #[test]
    fn test_other_keys_last_writer_wins() {
        let mut store = MemoryStateStore::new();

        store.record(StateKey::Pid, "100").unwrap();
        store.record(StateKey::Pid, "200").unwrap();
        assert_eq!(store.get_u32(StateKey::Pid), Some(200));
    }

    #[test]
    fn test_empty_value_is_absent() {
        let mut store = MemoryStateStore::new().with(StateKey::ProxyUrl, "");

        assert_eq!(store.get(StateKey::ProxyUrl), None);
        // 空文字列は「未記録」なので最初の書き込みとして扱われる
        assert!(store.record(StateKey::ProxyUrl, "http://h:1").unwrap());
    }

    #[test]
    fn test_json_store_persists_across_instances() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state").join("mitmflow-state.json");

        {
            let mut store = JsonStateStore::open(&path).unwrap();
            store.put(StateKey::Pid, "4242").unwrap();
            store.put(StateKey::Enabled, "true").unwrap();
        }

        let store = JsonStateStore::open(&path).unwrap();
        assert_eq!(store.get_u32(StateKey::Pid), Some(4242));
        assert_eq!(store.get(StateKey::Enabled).as_deref(), Some("true"));
        assert_eq!(store.get(StateKey::StreamFile), None);
    }

    #[test]
    fn test_json_store_rejects_newer_version() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"version": 99, "updated_at": "2024-01-01T00:00:00Z", "values": {}}"#,
        )
        .unwrap();

        let result = JsonStateStore::open(&path);
        assert!(matches!(result, Err(CoreError::StateParse { .. })));
    }
}
