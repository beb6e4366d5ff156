//! GitHub Actions ホスト連携
//!
//! ランナーが提供する入力・状態・出力・環境変数の各チャネルを扱う。
//!
//! - 入力: `INPUT_<NAME>` 環境変数
//! - 状態: 書き込みは `GITHUB_STATE` ファイル、読み込みは `STATE_<name>` 環境変数
//! - 出力: `GITHUB_OUTPUT` ファイル
//! - 環境変数のエクスポート: `GITHUB_ENV` ファイル
//! - アノテーション: 標準出力への `::warning::` 等のワークフローコマンド

use crate::error::{CoreError, Result};
use crate::state::{StateKey, StateStore};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const GITHUB_STATE: &str = "GITHUB_STATE";
pub const GITHUB_OUTPUT: &str = "GITHUB_OUTPUT";
pub const GITHUB_ENV: &str = "GITHUB_ENV";

/// アクション入力を読む
///
/// ランナーは `INPUT_LISTEN-HOST` のようにハイフンを残した名前で渡すが、
/// 手動実行では `INPUT_LISTEN_HOST` が使われることも多いので両方を見る。
/// 前後の空白は除去し、空文字列は未指定として扱う。
pub fn input(name: &str) -> Option<String> {
    let upper = name.replace(' ', "_").to_uppercase();
    let candidates = [
        format!("INPUT_{}", upper),
        format!("INPUT_{}", upper.replace('-', "_")),
    ];

    candidates
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn delimiter() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    format!("ghadelimiter_{}_{:x}", std::process::id(), nanos)
}

/// コマンドファイルに heredoc 形式で1エントリ追記する
pub fn append_command_file(path: &Path, name: &str, value: &str) -> Result<()> {
    let delimiter = delimiter();
    if name.contains(&delimiter) || value.contains(&delimiter) {
        return Err(CoreError::InvalidInput {
            name: name.to_string(),
            message: "値に区切り文字が含まれています".to_string(),
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CoreError::HostFileWrite {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    writeln!(file, "{}<<{}\n{}\n{}", name, delimiter, value, delimiter).map_err(|e| {
        CoreError::HostFileWrite {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    Ok(())
}

fn escape_data(message: &str) -> String {
    message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// 警告アノテーション
pub fn warning(message: &str) {
    println!("::warning::{}", escape_data(message));
}

/// エラーアノテーション
pub fn error(message: &str) {
    println!("::error::{}", escape_data(message));
}

/// 通知アノテーション
pub fn notice(message: &str) {
    println!("::notice::{}", escape_data(message));
}

/// GitHub Actions の状態 API を使うストア
///
/// 同じフェーズ内で書いた値は `STATE_*` に反映されないため、
/// 書き込んだ値を手元に保持して読み込み時に優先する。
#[derive(Debug, Default)]
pub struct ActionsStateStore {
    state_file: Option<PathBuf>,
    written: HashMap<StateKey, String>,
}

impl ActionsStateStore {
    pub fn new(state_file: Option<PathBuf>) -> Self {
        Self {
            state_file,
            written: HashMap::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var_os(GITHUB_STATE).map(PathBuf::from))
    }
}

impl StateStore for ActionsStateStore {
    fn get(&self, key: StateKey) -> Option<String> {
        if let Some(value) = self.written.get(&key).filter(|v| !v.is_empty()) {
            return Some(value.clone());
        }
        std::env::var(format!("STATE_{}", key.as_str()))
            .ok()
            .filter(|v| !v.is_empty())
    }

    fn put(&mut self, key: StateKey, value: &str) -> Result<()> {
        match &self.state_file {
            Some(path) => append_command_file(path, key.as_str(), value)?,
            None => {
                // 旧ランナー向けのワークフローコマンド
                println!("::save-state name={}::{}", key.as_str(), escape_data(value));
            }
        }
        self.written.insert(key, value.to_string());
        Ok(())
    }
}

/// 後続ステップへの出力チャネル
pub trait OutputSink {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()>;

    /// 後続ステップの環境変数として公開する
    fn export_variable(&mut self, name: &str, value: &str) -> Result<()>;
}

/// `GITHUB_OUTPUT` / `GITHUB_ENV` に書き込む出力チャネル
#[derive(Debug, Default)]
pub struct ActionsOutputs {
    output_file: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl ActionsOutputs {
    pub fn new(output_file: Option<PathBuf>, env_file: Option<PathBuf>) -> Self {
        Self {
            output_file,
            env_file,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var_os(GITHUB_OUTPUT).map(PathBuf::from),
            std::env::var_os(GITHUB_ENV).map(PathBuf::from),
        )
    }
}

impl OutputSink for ActionsOutputs {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()> {
        match &self.output_file {
            Some(path) => append_command_file(path, name, value),
            None => {
                println!("{}={}", name, value);
                Ok(())
            }
        }
    }

    fn export_variable(&mut self, name: &str, value: &str) -> Result<()> {
        match &self.env_file {
            Some(path) => append_command_file(path, name, value),
            None => Err(CoreError::HostFileWrite {
                path: PathBuf::from(format!("${}", GITHUB_ENV)),
                message: "環境変数ファイルが設定されていません".to_string(),
            }),
        }
    }
}

/// メモリ上の出力チャネル（テスト用）
#[derive(Debug, Default)]
pub struct MemoryOutputs {
    pub outputs: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl OutputSink for MemoryOutputs {
    fn set_output(&mut self, name: &str, value: &str) -> Result<()> {
        self.outputs.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn export_variable(&mut self, name: &str, value: &str) -> Result<()> {
        self.env.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_input_accepts_dashed_and_underscored_names() {
        temp_env::with_vars(
            [
                ("INPUT_LISTEN-HOST", Some("0.0.0.0")),
                ("INPUT_LISTEN_PORT", Some(" 9090 ")),
                ("INPUT_PASSPHRASE", Some("")),
            ],
            || {
                assert_eq!(input("listen-host").as_deref(), Some("0.0.0.0"));
                assert_eq!(input("listen-port").as_deref(), Some("9090"));
                assert_eq!(input("passphrase"), None);
                assert_eq!(input("not-set-anywhere"), None);
            },
        );
    }

    #[test]
    fn test_append_command_file_heredoc() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("output");

        append_command_file(&path, "proxy-url", "http://127.0.0.1:8080").unwrap();
        append_command_file(&path, "cacert-path", "").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("proxy-url<<ghadelimiter_"));
        assert_eq!(lines[1], "http://127.0.0.1:8080");
        assert_eq!(lines[2], lines[0].trim_start_matches("proxy-url<<"));
        assert!(lines[3].starts_with("cacert-path<<"));
        assert_eq!(lines[4], "");
    }

    #[test]
    #[serial]
    fn test_actions_state_reads_env_and_overlay() {
        let temp_dir = tempdir().unwrap();
        let state_file = temp_dir.path().join("state");

        temp_env::with_vars(
            [("STATE_pid", Some("31337")), ("STATE_proxy-url", Some(""))],
            || {
                let mut store = ActionsStateStore::new(Some(state_file.clone()));
                assert_eq!(store.get_u32(StateKey::Pid), Some(31337));
                assert_eq!(store.get(StateKey::ProxyUrl), None);

                store.put(StateKey::Pid, "7").unwrap();
                assert_eq!(store.get_u32(StateKey::Pid), Some(7));
            },
        );

        let content = std::fs::read_to_string(&state_file).unwrap();
        assert!(content.starts_with("pid<<"));
        assert!(content.contains("\n7\n"));
    }

    #[test]
    fn test_export_without_env_file_fails() {
        let mut outputs = ActionsOutputs::new(None, None);
        assert!(outputs.export_variable("http_proxy", "http://h:1").is_err());
    }

    #[test]
    fn test_escape_data() {
        assert_eq!(escape_data("50%\nline"), "50%25%0Aline");
    }
}
