//! アクション入力の読み込み
//!
//! CLIフラグで明示された値 → `INPUT_*` 環境変数 → 既定値 の順に解決する。

use crate::actions;
use crate::error::{CoreError, Result};
use crate::model::{DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, ListenAddr};
use std::path::PathBuf;

/// 既定のプロキシバイナリ
pub const DEFAULT_BINARY: &str = "mitmdump";

/// CLIフラグによる上書き値
#[derive(Debug, Clone, Default)]
pub struct InputOverrides {
    pub enabled: Option<String>,
    pub listen_host: Option<String>,
    pub listen_port: Option<String>,
    pub install_cacert: Option<String>,
    pub set_envvars: Option<String>,
    pub passphrase: Option<String>,
    pub binary_path: Option<String>,
}

impl InputOverrides {
    fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "enabled" => self.enabled.as_ref(),
            "listen-host" => self.listen_host.as_ref(),
            "listen-port" => self.listen_port.as_ref(),
            "install-cacert" => self.install_cacert.as_ref(),
            "set-envvars" => self.set_envvars.as_ref(),
            "passphrase" => self.passphrase.as_ref(),
            "binary-path" => self.binary_path.as_ref(),
            _ => None,
        };
        value.filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// 解決済みのアクション入力
#[derive(Debug, Clone)]
pub struct ActionInputs {
    pub enabled: bool,
    pub listen: ListenAddr,
    pub install_cacert: bool,
    pub set_envvars: bool,
    /// 未指定なら暗号化しない
    pub passphrase: Option<String>,
    pub binary: PathBuf,
}

impl ActionInputs {
    /// CLIフラグと `INPUT_*` 環境変数から読み込む
    pub fn load(overrides: &InputOverrides) -> Result<Self> {
        Self::from_source(|name| overrides.get(name).or_else(|| actions::input(name)))
    }

    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let enabled = parse_bool("enabled", lookup("enabled"), true)?;
        let host = lookup("listen-host").unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());
        let port = lookup("listen-port").unwrap_or_else(|| DEFAULT_LISTEN_PORT.to_string());
        let port_check = validate_port(&port);
        let install_cacert = parse_bool("install-cacert", lookup("install-cacert"), false);
        let set_envvars = parse_bool("set-envvars", lookup("set-envvars"), false);

        // 無効なジョブは他の入力の誤りで失敗させず、既定値に戻す
        let (port, install_cacert, set_envvars) = if enabled {
            port_check?;
            (port, install_cacert?, set_envvars?)
        } else {
            if let Err(e) = &port_check {
                tracing::debug!(error = %e, "Ignoring invalid input for disabled job");
            }
            (
                port_check
                    .map(|_| port)
                    .unwrap_or_else(|_| DEFAULT_LISTEN_PORT.to_string()),
                install_cacert.unwrap_or(false),
                set_envvars.unwrap_or(false),
            )
        };

        Ok(Self {
            enabled,
            listen: ListenAddr::new(host.trim(), port.trim()),
            install_cacert,
            set_envvars,
            passphrase: lookup("passphrase"),
            binary: lookup("binary-path")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY)),
        })
    }
}

/// YAML 1.2 Core Schema の真偽値表記を受け付ける
pub fn parse_bool(name: &str, value: Option<String>, default: bool) -> Result<bool> {
    let Some(value) = value else {
        return Ok(default);
    };

    match value.trim() {
        "true" | "True" | "TRUE" => Ok(true),
        "false" | "False" | "FALSE" => Ok(false),
        "" => Ok(default),
        other => Err(CoreError::InvalidInput {
            name: name.to_string(),
            message: format!(
                "'{}' は真偽値ではありません（true / false を指定してください）",
                other
            ),
        }),
    }
}

fn validate_port(port: &str) -> Result<()> {
    match port.trim().parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(CoreError::InvalidInput {
            name: "listen-port".to_string(),
            message: format!("'{}' は有効なポート番号ではありません", port),
        }),
    }
}
