//! CA証明書の待機とシステムへの登録
//!
//! プロキシは起動後に confdir へ CA 証明書を生成する。生成を待ってから
//! OS の信頼ストアへの登録を試みるが、登録はすべてベストエフォート。

use crate::command;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 証明書生成の確認回数
pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;
/// 確認間隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// 1件の登録試行の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallAttempt {
    pub target: String,
    pub outcome: std::result::Result<(), String>,
}

impl InstallAttempt {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// 証明書ファイルが現れるまで待つ
///
/// 生成されなかった場合は `None`（警告はしない。呼び出し側で判断する）。
pub async fn wait_for_cacert(path: &Path, attempts: u32, interval: Duration) -> Option<PathBuf> {
    for attempt in 1..=attempts {
        if path.is_file() {
            debug!(attempt, path = %path.display(), "CA certificate found");
            return Some(path.to_path_buf());
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    None
}

async fn attempt(target: &str, program: &str, args: &[&str]) -> InstallAttempt {
    let outcome = command::run(program, args.iter())
        .await
        .map(|_| ())
        .map_err(|e| e.to_string());

    match &outcome {
        Ok(()) => info!(target, "Installed CA certificate"),
        Err(e) => warn!(target, error = %e, "Failed to install CA certificate"),
    }

    InstallAttempt {
        target: target.to_string(),
        outcome,
    }
}

/// 証明書を OS の信頼ストアへ登録する
pub async fn install_cacert(path: &Path) -> Vec<InstallAttempt> {
    let cert = path.to_string_lossy().to_string();
    install_for_platform(&cert).await
}

#[cfg(target_os = "linux")]
async fn install_for_platform(cert: &str) -> Vec<InstallAttempt> {
    const SYSTEM_CERT: &str = "/usr/local/share/ca-certificates/mitmproxy-ca-cert.crt";

    // 非対話で使える sudo があれば使う（CI ランナーは通常パスワード不要）
    let use_sudo = command::run("sudo", ["-n", "true"]).await.is_ok();
    let elevated = |args: &[&'static str]| -> Vec<String> {
        let prefix: &[&str] = if use_sudo { &["sudo", "-n"] } else { &[] };
        prefix.iter().chain(args).map(|s| s.to_string()).collect()
    };

    let mut copy = elevated(&["cp"]);
    copy.push(cert.to_string());
    copy.push(SYSTEM_CERT.to_string());
    let update = elevated(&["update-ca-certificates"]);

    let mut attempts = Vec::new();
    let copied = attempt_argv("ca-certificates", &copy).await;
    let copy_ok = copied.succeeded();
    attempts.push(copied);

    if copy_ok {
        attempts.push(attempt_argv("update-ca-certificates", &update).await);
    }

    attempts
}

#[cfg(target_os = "linux")]
async fn attempt_argv(target: &str, argv: &[String]) -> InstallAttempt {
    let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
    attempt(target, &argv[0], &args).await
}

#[cfg(target_os = "macos")]
async fn install_for_platform(cert: &str) -> Vec<InstallAttempt> {
    let keychain = dirs::home_dir()
        .map(|home| home.join("Library/Keychains/login.keychain-db"))
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| "login.keychain-db".to_string());

    vec![
        attempt(
            "login keychain",
            "security",
            &["add-trusted-cert", "-r", "trustRoot", "-k", &keychain, cert],
        )
        .await,
    ]
}

#[cfg(windows)]
async fn install_for_platform(cert: &str) -> Vec<InstallAttempt> {
    vec![
        attempt("Root (machine)", "certutil", &["-addstore", "-f", "Root", cert]).await,
        attempt(
            "Root (user)",
            "certutil",
            &["-addstore", "-user", "-f", "Root", cert],
        )
        .await,
    ]
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
async fn install_for_platform(_cert: &str) -> Vec<InstallAttempt> {
    vec![InstallAttempt {
        target: std::env::consts::OS.to_string(),
        outcome: Err("この環境では証明書の登録に未対応です".to_string()),
    }]
}
