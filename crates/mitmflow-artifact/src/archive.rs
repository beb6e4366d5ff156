use crate::error::{ArtifactError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::Path;
use tar::Builder;

pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// キャプチャファイル1つを tar.gz アーカイブとして書き出す
    ///
    /// アーカイブ内のエントリ名はファイル名のみ。書き出したサイズを返す。
    pub fn create(capture: &Path, archive_path: &Path) -> Result<u64> {
        if !capture.is_file() {
            return Err(ArtifactError::CaptureNotFound(capture.to_path_buf()));
        }
        tracing::debug!(
            "Archiving {} -> {}",
            capture.display(),
            archive_path.display()
        );

        let entry_name = capture
            .file_name()
            .ok_or_else(|| ArtifactError::CaptureNotFound(capture.to_path_buf()))?;

        let archive_err = |source: std::io::Error| ArtifactError::Archive {
            path: archive_path.to_path_buf(),
            source,
        };

        let file = File::create(archive_path).map_err(archive_err)?;
        {
            let encoder = GzEncoder::new(file, Compression::default());
            let mut tar = Builder::new(encoder);

            tar.append_path_with_name(capture, entry_name)
                .map_err(archive_err)?;

            let encoder = tar.into_inner().map_err(archive_err)?;
            encoder.finish().map_err(archive_err)?;
        }

        let size = std::fs::metadata(archive_path).map_err(archive_err)?.len();
        tracing::debug!("Archive created: {} bytes", size);

        Ok(size)
    }
}
