#![allow(deprecated)]

mod common;

use assert_cmd::Command;
use common::TestJob;
use predicates::prelude::*;

/// CLIヘルプにフェーズが表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("mitmflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pre"))
        .stdout(predicate::str::contains("main"))
        .stdout(predicate::str::contains("post"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("mitmflow").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mitmflow"));
}

/// 待機時間のフラグはヘルプに出さない
#[test]
fn test_timing_flags_are_hidden() {
    let mut cmd = Command::cargo_bin("mitmflow").unwrap();
    cmd.arg("post")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--passphrase"))
        .stdout(predicate::str::contains("--grace-period-ms").not());
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("mitmflow").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

#[test]
fn test_invalid_boolean_input_fails() {
    let job = TestJob::new();
    job.phase("pre")
        .arg("--enabled")
        .arg("yes")
        .assert()
        .failure()
        .stdout(predicate::str::contains("::error::"));
}

/// enabled=false ではプロセスもディレクトリも作られず、出力はすべて空
#[test]
fn test_disabled_job_publishes_empty_outputs() {
    let job = TestJob::new();

    job.phase("pre").arg("--enabled").arg("false").assert().success();
    // main / post は pre が記録した値に従う
    job.phase("main").assert().success();
    job.phase("post").assert().success();

    let outputs = job.read_outputs();
    for name in ["proxy-url", "stream-file", "traffic-file", "cacert-path"] {
        assert!(
            outputs.contains(&format!("{}<<", name)),
            "missing output {} in {:?}",
            name,
            outputs
        );
    }
    assert!(!outputs.contains("http://"));
    assert!(!job.proxy_dir().exists());
    assert!(job.uploaded_artifacts().is_empty());
}

/// 無効なジョブでは他の入力が不正でも失敗せず、空の出力を公開する
#[test]
fn test_disabled_job_ignores_invalid_port() {
    let job = TestJob::new();

    for phase in ["main", "post"] {
        job.phase(phase)
            .arg("--enabled")
            .arg("false")
            .arg("--listen-port")
            .arg("abc")
            .assert()
            .success()
            .stdout(predicate::str::contains("::error::").not());
    }

    let outputs = job.read_outputs();
    assert!(outputs.contains("proxy-url<<"));
    assert!(!outputs.contains("http://"));
    assert!(job.uploaded_artifacts().is_empty());
}

/// pre で無効化されたジョブは後続フェーズの不正な入力でも失敗しない
#[test]
fn test_recorded_disabled_wins_over_invalid_inputs() {
    let job = TestJob::new();

    job.phase("pre").arg("--enabled").arg("false").assert().success();
    job.phase("main")
        .arg("--listen-port")
        .arg("abc")
        .assert()
        .success();
    job.phase("post")
        .arg("--listen-port")
        .arg("abc")
        .assert()
        .success();

    assert!(!job.proxy_dir().exists());
}

/// キャプチャが無くてもプレースホルダーを1つのアーティファクトとしてアップロードする
#[test]
fn test_post_without_capture_uploads_placeholder() {
    let job = TestJob::new();

    job.phase("post")
        .assert()
        .success()
        .stdout(predicate::str::contains("::warning::"))
        .stdout(predicate::str::contains("traffic_empty.mitm"))
        .stdout(predicate::str::contains("ローカルに保存しました"));

    assert!(job.proxy_dir().join("traffic_empty.mitm").exists());
    let artifacts = job.uploaded_artifacts();
    assert_eq!(artifacts.len(), 1);
    assert!(artifacts[0].starts_with("mitmproxy_traffic_"));
}

/// 停止は何度実行しても失敗しない
#[test]
fn test_post_twice_is_harmless() {
    let job = TestJob::new();

    job.phase("post").assert().success();
    job.phase("post").assert().success();
}

#[test]
fn test_main_without_pre_uses_defaults() {
    let job = TestJob::new();

    job.phase("main")
        .arg("--listen-port")
        .arg("18081")
        .assert()
        .success();

    let outputs = job.read_outputs();
    assert!(outputs.contains("http://127.0.0.1:18081"));
}

#[cfg(target_os = "linux")]
mod lifecycle {
    use super::*;

    /// pre → main → post の一連の流れを偽バイナリで確認
    #[test]
    fn test_full_lifecycle_with_fake_proxy() {
        let job = TestJob::new();
        let binary = job.fake_mitmdump();

        job.phase("pre")
            .arg("--binary-path")
            .arg(&binary)
            .arg("--listen-port")
            .arg("18082")
            .arg("--set-envvars")
            .arg("true")
            .arg("--settle-delay-ms")
            .arg("300")
            .assert()
            .success()
            .stdout(predicate::str::contains("http://127.0.0.1:18082"));

        let pid_file = job.proxy_dir().join("mitmdump.pid");
        assert!(pid_file.exists());

        // pre が記録した値が使われる
        job.phase("main").arg("--set-envvars").arg("false").assert().success();

        let outputs = job.read_outputs();
        assert!(outputs.contains("http://127.0.0.1:18082"));
        assert!(outputs.contains(".mitm"));
        let env = std::fs::read_to_string(job.env_file()).unwrap();
        assert!(env.contains("http_proxy<<"));
        assert!(env.contains("https_proxy<<"));

        job.phase("post")
            .arg("--grace-period-ms")
            .arg("500")
            .assert()
            .success()
            .stdout(predicate::str::contains("terminated gracefully"));

        assert!(!pid_file.exists());
        let artifacts = job.uploaded_artifacts();
        assert_eq!(artifacts.len(), 1);
        let uploaded = job.artifact_dir().join(&artifacts[0]);
        assert!(uploaded.join("mitmdump.log").exists());
        assert!(uploaded.join(format!("{}.tar.gz", artifacts[0])).exists());
    }

    /// main だけで set-envvars を指定しても pre の記録が優先される
    #[test]
    fn test_main_set_envvars_ignored_after_pre_recorded() {
        let job = TestJob::new();
        let binary = job.fake_mitmdump();

        job.phase("pre")
            .arg("--binary-path")
            .arg(&binary)
            .arg("--listen-port")
            .arg("18083")
            .arg("--settle-delay-ms")
            .arg("300")
            .assert()
            .success();

        job.phase("main").arg("--set-envvars").arg("true").assert().success();
        let exported = std::fs::read_to_string(job.env_file()).unwrap_or_default();
        assert!(!exported.contains("http_proxy"));

        job.phase("post")
            .arg("--grace-period-ms")
            .arg("500")
            .assert()
            .success();
    }

    /// 起動直後に終了したプロキシはログ付きで失敗する
    #[test]
    fn test_early_exit_fails_with_log() {
        use std::os::unix::fs::PermissionsExt;

        let job = TestJob::new();
        let binary = job.root.path().join("crashing-mitmdump");
        std::fs::write(
            &binary,
            "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then exit 0; fi\necho 'Error starting proxy server: address in use'\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        job.phase("pre")
            .arg("--binary-path")
            .arg(&binary)
            .arg("--settle-delay-ms")
            .arg("300")
            .assert()
            .failure()
            .stdout(predicate::str::contains("::error::"))
            .stdout(predicate::str::contains("address in use"));
    }
}
