#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// 1ジョブ分の作業ディレクトリ一式
pub struct TestJob {
    pub root: TempDir,
}

impl TestJob {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.path().join("state.json")
    }

    pub fn proxy_dir(&self) -> PathBuf {
        self.root.path().join("proxy")
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.root.path().join("uploads")
    }

    pub fn output_file(&self) -> PathBuf {
        self.root.path().join("github_output")
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.path().join("github_env")
    }

    pub fn read_outputs(&self) -> String {
        fs::read_to_string(self.output_file()).unwrap_or_default()
    }

    /// アップロードされたアーティファクト（ディレクトリ名）
    pub fn uploaded_artifacts(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.artifact_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// ホストの環境に左右されないフェーズ実行コマンド
    pub fn phase(&self, phase: &str) -> Command {
        let mut cmd = Command::cargo_bin("mitmflow").unwrap();
        cmd.arg(phase)
            .arg("--state-file")
            .arg(self.state_file())
            .arg("--proxy-dir")
            .arg(self.proxy_dir())
            .arg("--artifact-dir")
            .arg(self.artifact_dir())
            .env("NO_COLOR", "1")
            .env("GITHUB_OUTPUT", self.output_file())
            .env("GITHUB_ENV", self.env_file())
            .env_remove("GITHUB_STATE")
            .env_remove("RUNNER_TEMP");
        for var in [
            "INPUT_ENABLED",
            "INPUT_LISTEN-HOST",
            "INPUT_LISTEN_HOST",
            "INPUT_LISTEN-PORT",
            "INPUT_LISTEN_PORT",
            "INPUT_INSTALL-CACERT",
            "INPUT_INSTALL_CACERT",
            "INPUT_SET-ENVVARS",
            "INPUT_SET_ENVVARS",
            "INPUT_PASSPHRASE",
            "INPUT_BINARY-PATH",
            "INPUT_BINARY_PATH",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// `--version` に応答し、キャプチャファイルを作ってから待機する偽バイナリ
    #[cfg(unix)]
    #[allow(dead_code)]
    pub fn fake_mitmdump(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.root.path().join("fake-mitmdump");
        fs::write(
            &path,
            r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "Mitmproxy: 10.0.0"; exit 0; fi
echo "fake proxy: $*"
while [ $# -gt 0 ]; do
  if [ "$1" = "--save-stream-file" ]; then printf 'flows' > "$2"; fi
  shift
done
exec sleep 30
"#,
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
