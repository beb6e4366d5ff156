use mitmflow_artifact::DirectoryArtifactStore;
use mitmflow_core::config::parse_bool;
use mitmflow_core::{
    ActionInputs, ActionsStateStore, JsonStateStore, ProxyDirectory, StateKey, StateStore,
};
use std::path::PathBuf;
use std::time::Duration;

/// アップロード先ディレクトリの既定名（`$GITHUB_WORKSPACE` 配下）
pub const DEFAULT_ARTIFACT_DIR: &str = "mitmflow-artifacts";

/// 各フェーズ共通の実行設定
#[derive(Debug, Clone)]
pub struct PhaseOptions {
    pub state_file: Option<PathBuf>,
    pub proxy_dir: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub settle_delay: Duration,
    pub grace_period: Duration,
    pub cert_poll_attempts: u32,
    pub cert_poll_interval: Duration,
}

impl Default for PhaseOptions {
    fn default() -> Self {
        Self {
            state_file: None,
            proxy_dir: None,
            artifact_dir: None,
            settle_delay: mitmflow_process::launcher::DEFAULT_SETTLE_DELAY,
            grace_period: mitmflow_process::terminator::DEFAULT_GRACE_PERIOD,
            cert_poll_attempts: mitmflow_process::cacert::DEFAULT_POLL_ATTEMPTS,
            cert_poll_interval: mitmflow_process::cacert::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PhaseOptions {
    /// `--state-file` があれば JSON ファイル、無ければホストの状態 API
    pub fn open_store(&self) -> anyhow::Result<Box<dyn StateStore>> {
        match &self.state_file {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Using JSON state file");
                Ok(Box::new(JsonStateStore::open(path)?))
            }
            None => Ok(Box::new(ActionsStateStore::from_env())),
        }
    }

    /// 明示指定 → 状態ストアの `temp-dir` → 既定ルート
    pub fn proxy_directory(&self, store: &dyn StateStore) -> ProxyDirectory {
        ProxyDirectory::locate(self.proxy_dir.as_deref(), store.get_path(StateKey::TempDir))
    }

    pub fn artifact_store(&self) -> DirectoryArtifactStore {
        let base = self.artifact_dir.clone().unwrap_or_else(|| {
            std::env::var_os("GITHUB_WORKSPACE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(std::env::temp_dir)
                .join(DEFAULT_ARTIFACT_DIR)
        });
        DirectoryArtifactStore::new(base)
    }
}

/// 記録済みの真偽値、無ければ入力値
///
/// pre で決まった値を後続フェーズでも使うため、状態ストアを優先する。
pub fn recorded_flag(store: &dyn StateStore, key: StateKey, input: bool) -> bool {
    match store.get(key) {
        Some(value) => parse_bool(key.as_str(), Some(value), input).unwrap_or(input),
        None => input,
    }
}

pub fn is_enabled(store: &dyn StateStore, inputs: &ActionInputs) -> bool {
    recorded_flag(store, StateKey::Enabled, inputs.enabled)
}
