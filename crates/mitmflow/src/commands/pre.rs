use crate::context::PhaseOptions;
use colored::Colorize;
use mitmflow_core::{ActionInputs, StateKey, StateStore, actions};
use mitmflow_process::{LaunchOptions, ProxyLauncher, cacert};

/// pre フェーズ: プロキシを起動して識別情報を記録する
pub async fn handle(
    options: &PhaseOptions,
    inputs: &ActionInputs,
    store: &mut dyn StateStore,
) -> anyhow::Result<()> {
    store.record(StateKey::Enabled, &inputs.enabled.to_string())?;
    if !inputs.enabled {
        println!("{}", "ℹ トラフィックの記録は無効です（enabled=false）".dimmed());
        return Ok(());
    }

    store.record(StateKey::InstallCacert, &inputs.install_cacert.to_string())?;
    store.record(StateKey::SetEnvvars, &inputs.set_envvars.to_string())?;
    store.record(StateKey::BinaryPath, &inputs.binary.to_string_lossy())?;

    let dir = options.proxy_directory(&*store);
    println!("{}", "mitmproxy を起動中...".yellow());
    println!("  待ち受け: {}", inputs.listen.to_string().cyan());
    println!("  ディレクトリ: {}", dir.path().display().to_string().cyan());

    let launcher = ProxyLauncher::new(
        LaunchOptions::new(&inputs.binary).with_settle_delay(options.settle_delay),
    );
    let handle = launcher.launch(&inputs.listen, &dir, store).await?;

    println!();
    println!(
        "{}",
        format!("✓ mitmproxy を起動しました (PID: {})", handle.pid)
            .green()
            .bold()
    );
    println!("  プロキシURL: {}", handle.proxy_url.cyan());
    println!(
        "  キャプチャ: {}",
        handle.stream_file.display().to_string().cyan()
    );

    if inputs.install_cacert {
        install_certificate(options, &dir, store).await?;
    }

    Ok(())
}

/// CA証明書の生成を待ち、信頼ストアへ登録する（失敗は警告のみ）
async fn install_certificate(
    options: &PhaseOptions,
    dir: &mitmflow_core::ProxyDirectory,
    store: &mut dyn StateStore,
) -> anyhow::Result<()> {
    println!("{}", "CA証明書の生成を待っています...".yellow());

    let Some(cert) = cacert::wait_for_cacert(
        &dir.cacert_file(),
        options.cert_poll_attempts,
        options.cert_poll_interval,
    )
    .await
    else {
        actions::warning(&format!(
            "CA証明書が生成されませんでした。{}",
            dir.describe()
        ));
        return Ok(());
    };

    store.record(StateKey::CacertPath, &cert.to_string_lossy())?;

    for attempt in cacert::install_cacert(&cert).await {
        match &attempt.outcome {
            Ok(()) => println!(
                "{}",
                format!("✓ CA証明書を登録しました ({})", attempt.target).green()
            ),
            Err(reason) => actions::warning(&format!(
                "CA証明書の登録に失敗しました ({}): {}",
                attempt.target, reason
            )),
        }
    }

    Ok(())
}
