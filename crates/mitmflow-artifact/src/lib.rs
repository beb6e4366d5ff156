//! キャプチャファイルのパッケージングとアップロード
//!
//! tar.gz への圧縮、openssl による任意の暗号化、
//! アーティファクトストアへのアップロードを提供する。

pub mod archive;
pub mod encrypt;
pub mod error;
pub mod package;
pub mod upload;

pub use archive::ArchiveBuilder;
pub use encrypt::{Encryptor, OpensslEncryptor, encrypted_path};
pub use error::{ArtifactError, Result};
pub use package::{PackageReport, PackageRequest, Packager, artifact_name};
pub use upload::{ArtifactStore, DirectoryArtifactStore, UploadReceipt};
