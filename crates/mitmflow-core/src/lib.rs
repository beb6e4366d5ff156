//! mitmflow のフェーズ間状態受け渡しとディレクトリ規約
//!
//! pre / main / post の各フェーズが共有する唯一の手段は、
//! ジョブ単位の状態ストアとプロキシディレクトリの2つだけ。

pub mod actions;
pub mod config;
pub mod error;
pub mod model;
pub mod proxy_dir;
pub mod resolver;
pub mod state;

pub use actions::{ActionsOutputs, ActionsStateStore, MemoryOutputs, OutputSink};
pub use config::{ActionInputs, InputOverrides};
pub use error::{CoreError, Result};
pub use model::{ListenAddr, ProcessHandle, resolve_proxy_url};
pub use proxy_dir::{ProxyDirectory, timestamp_slug};
pub use resolver::{ResolvedFrom, ResolvedOutput};
pub use state::{JsonStateStore, MemoryStateStore, StateKey, StateStore, WritePolicy};
