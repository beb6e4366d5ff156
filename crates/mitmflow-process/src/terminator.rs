//! プロキシプロセスの段階的な終了
//!
//! 生存確認 → 終了要求 → 猶予待ち → 再確認 → 強制終了 の順に進む。
//! 最初から強制終了はしない（キャプチャのバッファを書き出させるため）。
//! シグナル送信の失敗はすべて警告扱いで、フェーズを失敗させない。

use crate::signal::{ProcessSignaller, SystemSignaller};
use mitmflow_core::{ProxyDirectory, StateKey, StateStore};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 終了要求から強制終了までの猶予
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// 終了処理の段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPhase {
    Probing,
    Graceful,
    Waiting,
    Reprobing,
    Forceful,
    Done,
}

/// 終了処理の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// 最初の確認時点で既に終了していた
    NotRunning,
    /// 終了要求で終了した
    Graceful,
    /// 猶予後も生きていたため強制終了した
    Forced,
    /// 強制終了のシグナル送信に失敗した
    Failed { reason: String },
}

impl fmt::Display for TerminationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationOutcome::NotRunning => write!(f, "not running"),
            TerminationOutcome::Graceful => write!(f, "terminated gracefully"),
            TerminationOutcome::Forced => write!(f, "killed"),
            TerminationOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// PID の取得元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidSource {
    State,
    PidFile,
}

/// `stop_recorded` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub pid: Option<(u32, PidSource)>,
    pub outcome: Option<TerminationOutcome>,
    pub pid_file_removed: bool,
}

impl StopReport {
    /// 警告として報告すべき失敗があるか
    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            Some(TerminationOutcome::Failed { reason }) => Some(reason),
            _ => None,
        }
    }
}

pub struct Terminator<S = SystemSignaller> {
    signaller: S,
    grace_period: Duration,
}

impl Terminator<SystemSignaller> {
    pub fn system(grace_period: Duration) -> Self {
        Self::new(SystemSignaller, grace_period)
    }
}

impl<S: ProcessSignaller> Terminator<S> {
    pub fn new(signaller: S, grace_period: Duration) -> Self {
        Self {
            signaller,
            grace_period,
        }
    }

    /// PID のプロセスを段階的に終了させる
    pub async fn terminate(&self, pid: u32) -> TerminationOutcome {
        let mut phase = TerminationPhase::Probing;
        let mut outcome = TerminationOutcome::NotRunning;

        while phase != TerminationPhase::Done {
            debug!(pid, ?phase, "Termination step");
            phase = match phase {
                TerminationPhase::Probing => {
                    if self.signaller.is_alive(pid) {
                        TerminationPhase::Graceful
                    } else {
                        info!("Process {} is not running", pid);
                        outcome = TerminationOutcome::NotRunning;
                        TerminationPhase::Done
                    }
                }
                TerminationPhase::Graceful => {
                    info!("Sending termination request to process {}", pid);
                    match self.signaller.graceful(pid) {
                        Ok(()) => TerminationPhase::Waiting,
                        Err(e) => {
                            // 拒否されても猶予後の再確認と強制終了は行う
                            warn!("Failed to request termination of {}: {}", pid, e);
                            TerminationPhase::Waiting
                        }
                    }
                }
                TerminationPhase::Waiting => {
                    tokio::time::sleep(self.grace_period).await;
                    TerminationPhase::Reprobing
                }
                TerminationPhase::Reprobing => {
                    if self.signaller.is_alive(pid) {
                        TerminationPhase::Forceful
                    } else {
                        info!("Process {} exited gracefully", pid);
                        outcome = TerminationOutcome::Graceful;
                        TerminationPhase::Done
                    }
                }
                TerminationPhase::Forceful => {
                    warn!(
                        "Process {} still alive after {:?}, killing",
                        pid, self.grace_period
                    );
                    outcome = match self.signaller.forceful(pid) {
                        Ok(()) => TerminationOutcome::Forced,
                        Err(e) => {
                            warn!("Failed to kill process {}: {}", pid, e);
                            TerminationOutcome::Failed {
                                reason: e.to_string(),
                            }
                        }
                    };
                    TerminationPhase::Done
                }
                TerminationPhase::Done => TerminationPhase::Done,
            };
        }

        outcome
    }

    /// 記録済みの PID を探して終了させ、PIDファイルを削除する
    ///
    /// 状態ストアの PID を優先し、無ければ PIDファイルを見る。
    /// どちらにも無い場合は何もしない（起動されなかった可能性がある）。
    pub async fn stop_recorded(&self, store: &dyn StateStore, dir: &ProxyDirectory) -> StopReport {
        let pid = match store.get_u32(StateKey::Pid) {
            Some(pid) => {
                info!(pid, "Using PID from state");
                Some((pid, PidSource::State))
            }
            None => dir.read_pid().map(|pid| {
                info!(pid, pid_file = %dir.pid_file().display(), "Using PID from file");
                (pid, PidSource::PidFile)
            }),
        };

        let Some((pid_value, _)) = pid else {
            info!(
                listing = %dir.describe(),
                "No PID available, nothing to stop"
            );
            return StopReport {
                pid: None,
                outcome: None,
                pid_file_removed: false,
            };
        };

        let outcome = self.terminate(pid_value).await;

        let pid_file_removed = match dir.remove_pid_file() {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Failed to remove PID file");
                false
            }
        };

        StopReport {
            pid,
            outcome: Some(outcome),
            pid_file_removed,
        }
    }
}
