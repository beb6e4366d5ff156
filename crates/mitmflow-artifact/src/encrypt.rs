//! アーカイブの暗号化
//!
//! 暗号アルゴリズム自体は外部の openssl に任せる。パスフレーズは
//! コマンドライン引数に載せず、子プロセスの環境変数でのみ渡す。

use crate::error::{ArtifactError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// 暗号化後のファイルに付ける拡張子
pub const ENCRYPTED_EXTENSION: &str = "enc";

/// パスフレーズを受け渡す環境変数
const PASSPHRASE_ENV: &str = "MITMFLOW_ARCHIVE_PASSPHRASE";

pub trait Encryptor {
    /// `input` を暗号化して `output` に書き出す
    fn encrypt(&self, input: &Path, output: &Path, passphrase: &str) -> Result<()>;
}

/// `openssl enc -aes-256-cbc -salt -pbkdf2` による暗号化
#[derive(Debug, Clone)]
pub struct OpensslEncryptor {
    program: PathBuf,
}

impl Default for OpensslEncryptor {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl OpensslEncryptor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "enc".to_string(),
            "-aes-256-cbc".to_string(),
            "-salt".to_string(),
            "-pbkdf2".to_string(),
            "-in".to_string(),
            input.to_string_lossy().to_string(),
            "-out".to_string(),
            output.to_string_lossy().to_string(),
            "-pass".to_string(),
            format!("env:{}", PASSPHRASE_ENV),
        ]
    }
}

impl Encryptor for OpensslEncryptor {
    fn encrypt(&self, input: &Path, output: &Path, passphrase: &str) -> Result<()> {
        tracing::debug!(
            "Encrypting {} -> {}",
            input.display(),
            output.display()
        );

        let result = Command::new(&self.program)
            .args(Self::args(input, output))
            .env(PASSPHRASE_ENV, passphrase)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                ArtifactError::EncryptionUnavailable(format!(
                    "{}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !result.status.success() {
            // 中途半端な出力は残さない
            let _ = std::fs::remove_file(output);
            return Err(ArtifactError::EncryptionFailed(format!(
                "{} ({})",
                String::from_utf8_lossy(&result.stderr).trim(),
                result.status
            )));
        }

        Ok(())
    }
}

/// `archive.tar.gz` → `archive.tar.gz.enc`
pub fn encrypted_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".");
    name.push(ENCRYPTED_EXTENSION);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_encrypted_path_appends_extension() {
        assert_eq!(
            encrypted_path(Path::new("/tmp/a/traffic.tar.gz")),
            PathBuf::from("/tmp/a/traffic.tar.gz.enc")
        );
    }

    #[test]
    fn test_passphrase_never_on_argv() {
        let args = OpensslEncryptor::args(Path::new("in"), Path::new("out"));
        assert!(args.contains(&format!("env:{}", PASSPHRASE_ENV)));
        assert!(args.iter().all(|a| !a.contains("s3cret")));
        assert_eq!(&args[..4], ["enc", "-aes-256-cbc", "-salt", "-pbkdf2"]);
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let temp_dir = tempdir().unwrap();
        let input = temp_dir.path().join("in.tar.gz");
        std::fs::write(&input, b"data").unwrap();

        let encryptor = OpensslEncryptor::new(temp_dir.path().join("no-openssl"));
        let result = encryptor.encrypt(&input, &encrypted_path(&input), "s3cret");

        assert!(matches!(result, Err(ArtifactError::EncryptionUnavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_passphrase_reaches_child_environment() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir().unwrap();
        // 受け取った引数と環境変数を出力先に書くだけの偽 openssl
        let fake = temp_dir.path().join("fake-openssl");
        std::fs::write(
            &fake,
            format!(
                "#!/bin/sh\nwhile [ \"$1\" != \"-out\" ]; do shift; done\nprintf '%s' \"${}\" > \"$2\"\n",
                PASSPHRASE_ENV
            ),
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = temp_dir.path().join("in.tar.gz");
        std::fs::write(&input, b"data").unwrap();
        let output = encrypted_path(&input);

        OpensslEncryptor::new(&fake)
            .encrypt(&input, &output, "s3cret")
            .unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "s3cret");
    }
}
