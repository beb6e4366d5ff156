use crate::context::{PhaseOptions, is_enabled, recorded_flag};
use colored::Colorize;
use mitmflow_core::proxy_dir::STREAM_PATH_FILE;
use mitmflow_core::{
    ActionInputs, ListenAddr, OutputSink, ProxyDirectory, StateKey, StateStore, actions,
    resolve_proxy_url, resolver,
};
use std::path::PathBuf;

pub const OUTPUT_PROXY_URL: &str = "proxy-url";
pub const OUTPUT_STREAM_FILE: &str = "stream-file";
pub const OUTPUT_TRAFFIC_FILE: &str = "traffic-file";
pub const OUTPUT_CACERT_PATH: &str = "cacert-path";

/// main フェーズで公開する値（空文字列は「無し」）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishedOutputs {
    pub proxy_url: String,
    pub stream_file: String,
    pub cacert_path: String,
}

impl PublishedOutputs {
    fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            (OUTPUT_PROXY_URL, &self.proxy_url),
            (OUTPUT_STREAM_FILE, &self.stream_file),
            (OUTPUT_TRAFFIC_FILE, &self.stream_file),
            (OUTPUT_CACERT_PATH, &self.cacert_path),
        ]
    }
}

/// main フェーズ: 識別情報を後続ステップ向けの出力として公開する
pub fn handle(
    options: &PhaseOptions,
    inputs: &ActionInputs,
    store: &dyn StateStore,
    sink: &mut dyn OutputSink,
) -> anyhow::Result<PublishedOutputs> {
    if !is_enabled(store, inputs) {
        println!("{}", "ℹ トラフィックの記録は無効です（enabled=false）".dimmed());
        let empty = PublishedOutputs::default();
        publish(sink, &empty);
        return Ok(empty);
    }

    let dir = options.proxy_directory(store);
    let listen = ListenAddr::new(
        store
            .get(StateKey::ListenHost)
            .unwrap_or_else(|| inputs.listen.host.clone()),
        store
            .get(StateKey::ListenPort)
            .unwrap_or_else(|| inputs.listen.port.clone()),
    );

    let published = PublishedOutputs {
        proxy_url: resolve_proxy_url(store, &dir, &listen),
        stream_file: stream_file(store, &dir)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default(),
        cacert_path: store
            .get_path(StateKey::CacertPath)
            .filter(|p| p.is_file())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default(),
    };

    if published.stream_file.is_empty() {
        actions::warning(&format!(
            "キャプチャファイルが見つかりません。{}",
            dir.describe()
        ));
    }

    publish(sink, &published);
    println!("{}", "✓ プロキシ情報を出力しました".green());
    println!("  プロキシURL: {}", published.proxy_url.cyan());
    println!("  キャプチャ: {}", published.stream_file.cyan());

    if recorded_flag(store, StateKey::SetEnvvars, inputs.set_envvars) {
        if let Err(e) = export_proxy_env(sink, &dir, &published.proxy_url) {
            actions::warning(&format!("プロキシ環境変数の設定に失敗しました: {}", e));
        }
    }

    Ok(published)
}

/// 記録済み・実在するキャプチャ、無ければ記録済みのパス（まだ書かれていない場合）
fn stream_file(store: &dyn StateStore, dir: &ProxyDirectory) -> Option<PathBuf> {
    resolver::locate(store, dir)
        .map(|found| found.path)
        .or_else(|| store.get_path(StateKey::StreamFile))
        .or_else(|| dir.read_sidecar(STREAM_PATH_FILE).map(PathBuf::from))
}

/// 出力の書き込み失敗は警告に留める
fn publish(sink: &mut dyn OutputSink, outputs: &PublishedOutputs) {
    for (name, value) in outputs.pairs() {
        if let Err(e) = sink.set_output(name, value) {
            actions::warning(&format!("出力 '{}' を書き込めませんでした: {}", name, e));
        }
    }
}

fn export_proxy_env(
    sink: &mut dyn OutputSink,
    dir: &ProxyDirectory,
    proxy_url: &str,
) -> anyhow::Result<()> {
    sink.export_variable("http_proxy", proxy_url)?;
    sink.export_variable("https_proxy", proxy_url)?;

    if cfg!(windows) {
        // Windows の curl は失効確認でプロキシ証明書を拒否する
        std::fs::write(dir.curlrc_file(), "ssl-no-revoke\n")?;
        sink.export_variable("CURL_HOME", &dir.path().to_string_lossy())?;
    }

    println!("{}", "✓ http_proxy / https_proxy を設定しました".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mitmflow_core::{MemoryOutputs, MemoryStateStore};
    use std::fs;
    use tempfile::tempdir;

    fn inputs() -> ActionInputs {
        ActionInputs::from_source(|_| None).unwrap()
    }

    fn options(dir: &std::path::Path) -> PhaseOptions {
        PhaseOptions {
            proxy_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_publishes_empty_outputs() {
        let temp_dir = tempdir().unwrap();
        let proxy_dir = temp_dir.path().join("proxy");
        let store = MemoryStateStore::new().with(StateKey::Enabled, "false");
        let mut sink = MemoryOutputs::default();

        let published = handle(&options(&proxy_dir), &inputs(), &store, &mut sink).unwrap();

        assert_eq!(published, PublishedOutputs::default());
        assert_eq!(sink.outputs.len(), 4);
        assert!(sink.outputs.values().all(|v| v.is_empty()));
        assert!(sink.env.is_empty());
        assert!(!proxy_dir.exists());
    }

    #[test]
    fn test_publishes_recorded_identity() {
        let temp_dir = tempdir().unwrap();
        let capture = temp_dir.path().join("traffic_2024-05-01T12-00-00.mitm");
        fs::write(&capture, b"").unwrap();
        let store = MemoryStateStore::new()
            .with(StateKey::Enabled, "true")
            .with(StateKey::ProxyUrl, "http://127.0.0.1:9090")
            .with(StateKey::StreamFile, capture.to_string_lossy());
        let mut sink = MemoryOutputs::default();

        handle(&options(temp_dir.path()), &inputs(), &store, &mut sink).unwrap();

        assert_eq!(sink.outputs["proxy-url"], "http://127.0.0.1:9090");
        assert_eq!(sink.outputs["stream-file"], capture.to_string_lossy());
        assert_eq!(sink.outputs["traffic-file"], sink.outputs["stream-file"]);
        assert_eq!(sink.outputs["cacert-path"], "");
    }

    #[test]
    fn test_proxy_url_derived_from_recorded_listen_address() {
        let temp_dir = tempdir().unwrap();
        let store = MemoryStateStore::new()
            .with(StateKey::ListenHost, "0.0.0.0")
            .with(StateKey::ListenPort, "18080");
        let mut sink = MemoryOutputs::default();

        let published = handle(&options(temp_dir.path()), &inputs(), &store, &mut sink).unwrap();

        assert_eq!(published.proxy_url, "http://0.0.0.0:18080");
    }

    #[test]
    fn test_recorded_stream_file_published_before_it_exists() {
        let temp_dir = tempdir().unwrap();
        let pending = temp_dir.path().join("traffic_pending.mitm");
        let store =
            MemoryStateStore::new().with(StateKey::StreamFile, pending.to_string_lossy());
        let mut sink = MemoryOutputs::default();

        let published = handle(&options(temp_dir.path()), &inputs(), &store, &mut sink).unwrap();

        assert_eq!(published.stream_file, pending.to_string_lossy());
    }

    #[test]
    fn test_set_envvars_exports_proxy() {
        let temp_dir = tempdir().unwrap();
        let store = MemoryStateStore::new().with(StateKey::SetEnvvars, "true");
        let mut sink = MemoryOutputs::default();

        handle(&options(temp_dir.path()), &inputs(), &store, &mut sink).unwrap();

        assert_eq!(sink.env["http_proxy"], "http://127.0.0.1:8080");
        assert_eq!(sink.env["https_proxy"], "http://127.0.0.1:8080");
    }

    /// pre が記録した set-envvars=false は main の入力より優先される
    #[test]
    fn test_recorded_set_envvars_wins_over_main_input() {
        let temp_dir = tempdir().unwrap();
        let store = MemoryStateStore::new().with(StateKey::SetEnvvars, "false");
        let mut inputs = inputs();
        inputs.set_envvars = true;
        let mut sink = MemoryOutputs::default();

        handle(&options(temp_dir.path()), &inputs, &store, &mut sink).unwrap();

        assert!(sink.env.is_empty());
    }
}
