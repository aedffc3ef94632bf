//! Deployable archive assembly.
//!
//! A bot's archive is the prebuilt base archive with the user's config
//! injected at a fixed path. All intermediate files live in a scoped
//! temporary directory that is removed on every exit path.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Deserialize;
use tokio::task::spawn_blocking;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ControlError, ControlResult};

/// Archive settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageConfig {
    /// Prebuilt base archive holding the bot runtime.
    #[serde(default = "default_base_archive")]
    pub base_archive: PathBuf,

    /// Directory scratch directories are created in.
    ///
    /// Defaults to the system temp directory.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Path of the user config inside the archive.
    #[serde(default = "default_config_entry")]
    pub config_entry: String,

    /// File that must exist at the archive root.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
}

fn default_base_archive() -> PathBuf {
    PathBuf::from("lambda_base.zip")
}

fn default_config_entry() -> String {
    "app/config/config.yaml".to_owned()
}

fn default_entry_point() -> String {
    "lambda_function.py".to_owned()
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            base_archive: default_base_archive(),
            work_dir: None,
            config_entry: default_config_entry(),
            entry_point: default_entry_point(),
        }
    }
}

/// A deployable archive whose entry point has been checked.
///
/// Only [`PackageArtifact::verify`] creates one, so holding an artifact
/// means the check passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    bytes: Bytes,
    entry_point: String,
}

impl PackageArtifact {
    /// Check `bytes` is a zip archive with `entry_point` at its root.
    pub fn verify(bytes: impl Into<Bytes>, entry_point: &str) -> ControlResult<Self> {
        let bytes = bytes.into();
        let archive = ZipArchive::new(Cursor::new(bytes.clone()))
            .map_err(|e| ControlError::packaging(format!("not a valid archive: {e}")))?;

        if !archive.file_names().any(|name| name == entry_point) {
            return Err(ControlError::packaging(format!(
                "entry point {entry_point} missing from archive root"
            )));
        }

        Ok(Self {
            bytes,
            entry_point: entry_point.to_owned(),
        })
    }

    /// Archive contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Entry point found at the archive root.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Archive size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the archive is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builds per-bot archives from the base archive.
#[derive(Debug, Clone)]
pub struct PackageAssembler {
    config: PackageConfig,
}

impl PackageAssembler {
    /// Create an assembler.
    #[must_use]
    pub fn new(config: PackageConfig) -> Self {
        Self { config }
    }

    /// Get the assembler configuration.
    #[must_use]
    pub fn config(&self) -> &PackageConfig {
        &self.config
    }

    /// Build the archive for one bot config and verify it.
    pub async fn assemble(&self, user_config: &[u8]) -> ControlResult<PackageArtifact> {
        let config = self.config.clone();
        let user_config = user_config.to_vec();

        let bytes = spawn_blocking(move || assemble_sync(&config, &user_config))
            .await
            .map_err(|e| ControlError::internal(format!("packaging task failed: {e}")))??;

        let artifact = PackageArtifact::verify(bytes, &self.config.entry_point)?;
        debug!(size = artifact.len(), "deployment archive assembled");
        Ok(artifact)
    }
}

fn assemble_sync(config: &PackageConfig, user_config: &[u8]) -> ControlResult<Vec<u8>> {
    let scratch = match &config.work_dir {
        Some(dir) => tempfile::Builder::new().prefix("botfleet-").tempdir_in(dir),
        None => tempfile::Builder::new().prefix("botfleet-").tempdir(),
    }
    .map_err(|e| ControlError::packaging(format!("failed to create scratch directory: {e}")))?;

    let base_copy = scratch.path().join("base.zip");
    std::fs::copy(&config.base_archive, &base_copy).map_err(|e| {
        ControlError::packaging(format!(
            "failed to copy base archive {}: {e}",
            config.base_archive.display()
        ))
    })?;

    let output = scratch.path().join("deployment.zip");
    inject_config(&base_copy, &output, &config.config_entry, user_config)
        .map_err(|e| ControlError::packaging(format!("failed to build archive: {e}")))?;

    std::fs::read(&output)
        .map_err(|e| ControlError::packaging(format!("failed to read archive: {e}")))
}

/// Copy every base entry except the config entry, then write the config.
fn inject_config(
    base: &Path,
    output: &Path,
    config_entry: &str,
    user_config: &[u8],
) -> zip::result::ZipResult<()> {
    let mut source = ZipArchive::new(File::open(base)?)?;
    let mut writer = ZipWriter::new(File::create(output)?);

    for index in 0..source.len() {
        let entry = source.by_index(index)?;
        if entry.name() == config_entry {
            continue;
        }
        writer.raw_copy_file(entry)?;
    }

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    writer.start_file(config_entry, options)?;
    writer.write_all(user_config)?;
    writer.finish()?;
    Ok(())
}

/// Read one entry out of an archive.
pub fn read_entry(archive: &[u8], name: &str) -> ControlResult<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| ControlError::packaging(format!("not a valid archive: {e}")))?;
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ControlError::packaging(format!("{name}: {e}")))?;

    let mut contents = Vec::new();
    entry
        .read_to_end(&mut contents)
        .map_err(|e| ControlError::packaging(format!("{name}: {e}")))?;
    Ok(contents)
}

/// Smallest valid artifact, for tests elsewhere in the crate.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn test_artifact() -> PackageArtifact {
    let mut buffer = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(&mut buffer);
    writer
        .start_file("lambda_function.py", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"def handler(event, context): pass\n").unwrap();
    writer.finish().unwrap();
    PackageArtifact::verify(buffer.into_inner(), "lambda_function.py").unwrap()
}
