use crate::context::{PhaseOptions, is_enabled};
use chrono::Utc;
use colored::Colorize;
use mitmflow_artifact::{ArtifactStore, PackageReport, PackageRequest, Packager};
use mitmflow_core::{ActionInputs, StateStore, actions, resolver};
use mitmflow_process::Terminator;

/// post フェーズ: プロキシを停止し、キャプチャをパッケージしてアップロードする
///
/// 無効化されていた場合は `None`。
pub async fn handle(
    options: &PhaseOptions,
    inputs: &ActionInputs,
    store: &dyn StateStore,
) -> anyhow::Result<Option<PackageReport>> {
    let artifact_store = options.artifact_store();
    println!(
        "  保存先: {}",
        artifact_store.base().display().to_string().cyan()
    );
    run(options, inputs, store, artifact_store).await
}

pub async fn run<A: ArtifactStore>(
    options: &PhaseOptions,
    inputs: &ActionInputs,
    store: &dyn StateStore,
    artifact_store: A,
) -> anyhow::Result<Option<PackageReport>> {
    if !is_enabled(store, inputs) {
        println!("{}", "ℹ トラフィックの記録は無効です（enabled=false）".dimmed());
        return Ok(None);
    }

    let dir = options.proxy_directory(store);

    println!("{}", "mitmproxy を停止中...".yellow());
    let stop = Terminator::system(options.grace_period)
        .stop_recorded(store, &dir)
        .await;
    if let Some(reason) = stop.failure() {
        actions::warning(&format!("mitmproxy の停止に失敗しました: {}", reason));
    } else {
        match (&stop.pid, &stop.outcome) {
            (Some((pid, _)), Some(outcome)) => {
                println!("{}", format!("✓ PID {}: {}", pid, outcome).green())
            }
            _ => println!(
                "{}",
                "ℹ 記録されたプロセスが無いため停止をスキップしました".dimmed()
            ),
        }
    }

    let capture = resolver::resolve(store, &dir)?;
    println!(
        "  キャプチャ: {} ({})",
        capture.path.display().to_string().cyan(),
        capture.source
    );

    let request = PackageRequest {
        capture: capture.path,
        log_file: Some(dir.log_file()),
        artifacts_dir: dir.artifacts_dir(),
        passphrase: inputs.passphrase.clone(),
        timestamp: Utc::now(),
    };

    let report = Packager::with_store(artifact_store)
        .package(&request)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    for warning in &report.warnings {
        actions::warning(warning);
    }

    println!();
    println!(
        "{}",
        format!(
            "✓ アーティファクト '{}' をローカルに保存しました",
            report.artifact_name
        )
        .green()
        .bold()
    );
    println!(
        "  場所: {}",
        report.receipt.location.display().to_string().cyan()
    );
    for file in &report.receipt.files {
        println!("  • {}", file);
    }

    Ok(Some(report))
}
