//! プロキシバイナリの確認とインストール

use crate::command;
use crate::error::{ProcessError, Result};
use std::path::Path;
use tracing::{info, warn};

/// pip 系インストーラーの候補（先に成功したものを使う）
const INSTALLERS: &[(&str, &[&str])] = &[
    ("pip", &["install", "--upgrade", "mitmproxy"]),
    ("pip3", &["install", "--upgrade", "mitmproxy"]),
    ("python3", &["-m", "pip", "install", "--upgrade", "mitmproxy"]),
];

/// バイナリが利用可能か確認し、無ければ pip でインストールする
pub async fn ensure_binary(binary: &Path) -> Result<()> {
    if command::responds_to_version(binary).await {
        info!(binary = %binary.display(), "mitmproxy is already installed");
        return Ok(());
    }

    info!(binary = %binary.display(), "Installing mitmproxy...");
    let mut failures = Vec::new();

    for (program, args) in INSTALLERS {
        match command::run(program, args.iter()).await {
            Ok(_) => {
                if command::responds_to_version(binary).await {
                    info!(installer = program, "Installed mitmproxy");
                    return Ok(());
                }
                failures.push(format!(
                    "{}: インストール後も {} を実行できません",
                    program,
                    binary.display()
                ));
            }
            Err(e) => {
                warn!(installer = program, error = %e, "Installer failed");
                failures.push(e.to_string());
            }
        }
    }

    Err(ProcessError::BinaryUnavailable {
        binary: binary.to_path_buf(),
        reason: failures.join("; "),
    })
}
