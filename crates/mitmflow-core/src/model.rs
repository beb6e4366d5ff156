//! ProcessHandle モデル
//!
//! pre フェーズで起動したプロキシプロセス1つ分の識別情報。
//! 状態ストアとサイドカーファイルの両方に冗長に保存する。

use crate::error::Result;
use crate::proxy_dir::{PROXY_URL_FILE, ProxyDirectory, STREAM_PATH_FILE};
use crate::state::{StateKey, StateStore};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: &str = "8080";

/// プロキシの待ち受けアドレス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: String,
}

impl ListenAddr {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// `http://{host}:{port}`
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for ListenAddr {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT)
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 起動済みプロキシプロセスの識別情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    /// プロセスID（OS）
    pub pid: u32,
    /// 待ち受けアドレス
    pub listen: ListenAddr,
    /// キャプチャファイル
    pub stream_file: PathBuf,
    /// 標準出力・標準エラーの書き込み先
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    /// プロキシURL
    pub proxy_url: String,
}

impl ProcessHandle {
    /// 状態ストアとサイドカーファイルに保存する
    ///
    /// `proxy-url` は既に記録されていればそちらを優先し、
    /// ハンドル側の値も記録済みの値に揃える。
    pub fn persist(&mut self, store: &mut dyn StateStore, dir: &ProxyDirectory) -> Result<()> {
        store.record(StateKey::TempDir, &dir.path().to_string_lossy())?;
        store.record(StateKey::ListenHost, &self.listen.host)?;
        store.record(StateKey::ListenPort, &self.listen.port)?;
        store.record(StateKey::Pid, &self.pid.to_string())?;
        store.record(StateKey::StreamFile, &self.stream_file.to_string_lossy())?;
        if !store.record(StateKey::ProxyUrl, &self.proxy_url)? {
            if let Some(recorded) = store.get(StateKey::ProxyUrl) {
                self.proxy_url = recorded;
            }
        }

        dir.write_sidecar(STREAM_PATH_FILE, &self.stream_file.to_string_lossy())?;
        dir.write_sidecar(PROXY_URL_FILE, &self.proxy_url)?;

        tracing::debug!(
            pid = self.pid,
            stream_file = %self.stream_file.display(),
            proxy_url = %self.proxy_url,
            "Persisted process handle"
        );
        Ok(())
    }
}

/// 状態ストアに記録済みのプロキシURL、無ければ待ち受けアドレスから導出
pub fn resolve_proxy_url(store: &dyn StateStore, dir: &ProxyDirectory, listen: &ListenAddr) -> String {
    store
        .get(StateKey::ProxyUrl)
        .or_else(|| dir.read_sidecar(PROXY_URL_FILE))
        .unwrap_or_else(|| listen.proxy_url())
}
