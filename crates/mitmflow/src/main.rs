mod commands;
mod context;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use context::PhaseOptions;
use mitmflow_core::{ActionInputs, ActionsOutputs, InputOverrides, StateKey, actions};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mitmflow")]
#[command(about = "CIジョブの通信を mitmproxy で記録する。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    phase: PhaseArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// プロキシを起動（ステップ開始前）
    Pre,
    /// プロキシ情報を出力（ステップ本体）
    Main,
    /// プロキシを停止してキャプチャをアップロード（ステップ終了後）
    Post,
    /// バージョン情報を表示
    Version,
}

/// 全フェーズ共通のオプション
///
/// 入力値のフラグは `INPUT_*` 環境変数より優先される。
#[derive(Args, Debug)]
struct PhaseArgs {
    /// フェーズ間の状態を保存する JSON ファイル（省略時はランナーの状態 API）
    #[arg(long, env = "MITMFLOW_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,

    /// プロキシディレクトリ（省略時は $RUNNER_TEMP/mitmproxy-logger-action）
    #[arg(long, env = "MITMFLOW_PROXY_DIR", global = true)]
    proxy_dir: Option<PathBuf>,

    /// アーティファクトの保存先（省略時は $GITHUB_WORKSPACE/mitmflow-artifacts）
    #[arg(long, env = "MITMFLOW_ARTIFACT_DIR", global = true)]
    artifact_dir: Option<PathBuf>,

    /// 記録を有効にするか (true / false)
    #[arg(long, global = true)]
    enabled: Option<String>,

    /// 待ち受けホスト
    #[arg(long, global = true)]
    listen_host: Option<String>,

    /// 待ち受けポート
    #[arg(long, global = true)]
    listen_port: Option<String>,

    /// CA証明書をシステムに登録するか (true / false)
    #[arg(long, global = true)]
    install_cacert: Option<String>,

    /// http_proxy / https_proxy を後続ステップに設定するか (true / false)
    #[arg(long, global = true)]
    set_envvars: Option<String>,

    /// キャプチャを暗号化するパスフレーズ
    #[arg(long, global = true)]
    passphrase: Option<String>,

    /// プロキシのバイナリ
    #[arg(long, global = true)]
    binary_path: Option<String>,

    #[arg(long, global = true, hide = true, default_value_t = 2000)]
    settle_delay_ms: u64,

    #[arg(long, global = true, hide = true, default_value_t = 3000)]
    grace_period_ms: u64,

    #[arg(long, global = true, hide = true, default_value_t = 10)]
    cert_poll_attempts: u32,

    #[arg(long, global = true, hide = true, default_value_t = 1000)]
    cert_poll_interval_ms: u64,
}

impl PhaseArgs {
    fn overrides(&self) -> InputOverrides {
        InputOverrides {
            enabled: self.enabled.clone(),
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port.clone(),
            install_cacert: self.install_cacert.clone(),
            set_envvars: self.set_envvars.clone(),
            passphrase: self.passphrase.clone(),
            binary_path: self.binary_path.clone(),
        }
    }

    fn options(&self) -> PhaseOptions {
        PhaseOptions {
            state_file: self.state_file.clone(),
            proxy_dir: self.proxy_dir.clone(),
            artifact_dir: self.artifact_dir.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
            cert_poll_attempts: self.cert_poll_attempts,
            cert_poll_interval: Duration::from_millis(self.cert_poll_interval_ms),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 標準出力はワークフローコマンドに使うため、ログは stderr に出す
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run(cli).await {
        actions::error(&format!("{:#}", e));
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Commands::Version) {
        println!("mitmflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let options = cli.phase.options();
    let mut store = options.open_store()?;
    let mut overrides = cli.phase.overrides();
    if !matches!(cli.command, Commands::Pre) {
        // pre が記録した enabled を入力より先に適用する
        if let Some(recorded) = store.get(StateKey::Enabled) {
            overrides.enabled = Some(recorded);
        }
    }
    let inputs = ActionInputs::load(&overrides)?;
    tracing::debug!(listen = %inputs.listen, enabled = inputs.enabled, "Loaded inputs");

    match cli.command {
        Commands::Pre => {
            commands::pre::handle(&options, &inputs, &mut *store).await?;
        }
        Commands::Main => {
            let mut sink = ActionsOutputs::from_env();
            commands::main::handle(&options, &inputs, &*store, &mut sink)?;
        }
        Commands::Post => {
            commands::post::handle(&options, &inputs, &*store).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before loading inputs");
        }
    }

    Ok(())
}
