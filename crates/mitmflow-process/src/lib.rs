//! プロキシプロセスのライフサイクル管理
//!
//! 切り離し起動、段階的な終了、CA証明書の待機と登録を提供する。

pub mod cacert;
pub mod command;
pub mod error;
pub mod install;
pub mod launcher;
pub mod signal;
pub mod terminator;

pub use cacert::{InstallAttempt, install_cacert, wait_for_cacert};
pub use error::{ProcessError, Result};
pub use launcher::{LaunchOptions, ProxyLauncher};
pub use signal::{ProcessSignaller, SystemSignaller};
pub use terminator::{PidSource, StopReport, TerminationOutcome, Terminator};
