//! プラットフォームごとのプロセス制御プリミティブ
//!
//! 終了処理は「生存確認」「穏当な終了要求」「強制終了」の3つだけに依存する。

use crate::error::{ProcessError, Result};

pub trait ProcessSignaller {
    /// プロセスが生きているか
    fn is_alive(&self, pid: u32) -> bool;

    /// 穏当な終了要求（Unix: SIGTERM）
    fn graceful(&self, pid: u32) -> Result<()>;

    /// 強制終了（Unix: SIGKILL）
    fn forceful(&self, pid: u32) -> Result<()>;
}

impl<T: ProcessSignaller + ?Sized> ProcessSignaller for &T {
    fn is_alive(&self, pid: u32) -> bool {
        (**self).is_alive(pid)
    }

    fn graceful(&self, pid: u32) -> Result<()> {
        (**self).graceful(pid)
    }

    fn forceful(&self, pid: u32) -> Result<()> {
        (**self).forceful(pid)
    }
}

/// OS のシグナル / タスク管理を使う実装
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSignaller;

#[cfg(unix)]
mod imp {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    /// 0 や負値になる PID はプロセスグループ宛てになるので拒否する
    fn to_nix_pid(pid: u32) -> Option<Pid> {
        i32::try_from(pid).ok().filter(|p| *p > 0).map(Pid::from_raw)
    }

    fn send(pid: u32, sig: Signal) -> Result<()> {
        let nix_pid = to_nix_pid(pid).ok_or_else(|| ProcessError::SignalFailed {
            pid,
            reason: "無効なPIDです".to_string(),
        })?;
        signal::kill(nix_pid, sig).map_err(|e| ProcessError::SignalFailed {
            pid,
            reason: e.to_string(),
        })
    }

    /// 回収されていない終了済みプロセスは生存とみなさない
    #[cfg(target_os = "linux")]
    fn is_zombie(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .ok()
            .and_then(|stat| {
                let (_, rest) = stat.rsplit_once(')')?;
                rest.trim_start().chars().next()
            })
            .map(|state| state == 'Z')
            .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    fn is_zombie(_pid: u32) -> bool {
        false
    }

    impl ProcessSignaller for SystemSignaller {
        fn is_alive(&self, pid: u32) -> bool {
            let Some(nix_pid) = to_nix_pid(pid) else {
                return false;
            };
            // signal 0 を送ることで存在確認が可能
            match signal::kill(nix_pid, None) {
                Ok(()) => !is_zombie(pid),
                Err(Errno::EPERM) => true,
                Err(_) => false,
            }
        }

        fn graceful(&self, pid: u32) -> Result<()> {
            send(pid, Signal::SIGTERM)
        }

        fn forceful(&self, pid: u32) -> Result<()> {
            send(pid, Signal::SIGKILL)
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use std::process::Command;

    fn taskkill(pid: u32, force: bool) -> Result<()> {
        let mut cmd = Command::new("taskkill");
        if force {
            cmd.arg("/F");
        }
        let output = cmd
            .arg("/PID")
            .arg(pid.to_string())
            .output()
            .map_err(|e| ProcessError::SignalFailed {
                pid,
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProcessError::SignalFailed {
                pid,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    impl ProcessSignaller for SystemSignaller {
        fn is_alive(&self, pid: u32) -> bool {
            Command::new("tasklist")
                .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
                .output()
                .map(|out| {
                    String::from_utf8_lossy(&out.stdout).contains(&format!("\"{}\"", pid))
                })
                .unwrap_or(false)
        }

        fn graceful(&self, pid: u32) -> Result<()> {
            taskkill(pid, false)
        }

        fn forceful(&self, pid: u32) -> Result<()> {
            taskkill(pid, true)
        }
    }
}

#[cfg(not(any(unix, windows)))]
impl ProcessSignaller for SystemSignaller {
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    fn graceful(&self, _pid: u32) -> Result<()> {
        Err(ProcessError::Unsupported("プロセスの終了".to_string()))
    }

    fn forceful(&self, _pid: u32) -> Result<()> {
        Err(ProcessError::Unsupported("プロセスの強制終了".to_string()))
    }
}
