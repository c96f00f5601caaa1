//! Transient audio files and their cleanup
//!
//! Every file a pipeline stage produces is wrapped in a [`TempArtifact`],
//! which deletes the file when dropped. This covers normal returns, early
//! `?` exits and dropped futures alike. An [`ArtifactScope`] groups the
//! artifacts of one pipeline run so they are removed together.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// File name prefix for every artifact we create
const ARTIFACT_PREFIX: &str = "voice-relay-";

/// Container and codec of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioEncoding {
    /// RIFF WAV with signed 16-bit PCM
    PcmWav,
    /// MPEG layer III
    Mp3,
    /// Ogg container with Opus (Telegram voice notes)
    OggOpus,
    /// Anything we have not probed yet
    Unknown,
}

impl AudioEncoding {
    /// Standard file extension, including the leading dot
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::PcmWav => ".wav",
            Self::Mp3 => ".mp3",
            Self::OggOpus => ".ogg",
            Self::Unknown => ".bin",
        }
    }

    /// Container format name
    #[must_use]
    pub const fn container(self) -> &'static str {
        match self {
            Self::PcmWav => "wav",
            Self::Mp3 => "mp3",
            Self::OggOpus => "ogg",
            Self::Unknown => "unknown",
        }
    }

    /// Codec name
    #[must_use]
    pub const fn codec(self) -> &'static str {
        match self {
            Self::PcmWav => "pcm_s16le",
            Self::Mp3 => "mp3",
            Self::OggOpus => "opus",
            Self::Unknown => "unknown",
        }
    }

    /// MIME type to use when uploading
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::PcmWav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::OggOpus => "audio/ogg",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Best guess from a MIME type reported by the chat platform
    #[must_use]
    pub fn from_mime(mime_type: &str) -> Self {
        match mime_type.to_lowercase().as_str() {
            "audio/wav" | "audio/x-wav" | "audio/wave" => Self::PcmWav,
            "audio/mpeg" | "audio/mp3" => Self::Mp3,
            "audio/ogg" | "audio/opus" => Self::OggOpus,
            _ => Self::Unknown,
        }
    }
}

/// Pipeline stage that produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Copy of the audio received from the chat platform
    Inbound,
    /// Canonical WAV written by the normalizer
    Normalize,
    /// Speech written by the synthesizer
    Synthesize,
}

/// Delete a file, treating a missing file as already deleted
///
/// Returns `Ok(true)` if a file was removed and `Ok(false)` if nothing was
/// there.
///
/// # Errors
///
/// Returns error for any failure other than the file not existing
pub fn remove_artifact(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed artifact");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// A transient file owned by the request that created it
///
/// Dropping the artifact deletes the file. Call [`TempArtifact::keep`] to
/// hand the file to someone else instead.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    encoding: AudioEncoding,
    stage: Stage,
    armed: bool,
}

impl TempArtifact {
    /// Take ownership of an existing file
    #[must_use]
    pub const fn adopt(path: PathBuf, encoding: AudioEncoding, stage: Stage) -> Self {
        Self {
            path,
            encoding,
            stage,
            armed: true,
        }
    }

    /// Location on disk
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Container and codec
    #[must_use]
    pub const fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    /// Stage that produced this file
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Read the whole file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    /// Delete the file now instead of waiting for drop
    ///
    /// Returns whether a file was actually removed.
    pub fn remove(mut self) -> bool {
        self.armed = false;
        match remove_artifact(&self.path) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove artifact");
                false
            }
        }
    }

    /// Stop tracking the file and return its path; the caller now owns it
    #[must_use]
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = remove_artifact(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove artifact");
        }
    }
}

/// Allocates uniquely named artifacts in one directory
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl TempStore {
    /// Store rooted at `dir` (created on first use)
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory artifacts are created in
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a staging file with a random name and the right extension
    ///
    /// The staging file deletes itself when dropped, so a stage that fails
    /// half-way leaves nothing behind. Promote it with [`TempStore::promote`].
    ///
    /// # Errors
    ///
    /// Returns error if the directory or the file cannot be created
    pub fn staging_file(&self, encoding: AudioEncoding) -> Result<NamedTempFile> {
        std::fs::create_dir_all(&self.dir)?;
        let file = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(encoding.extension())
            .tempfile_in(&self.dir)?;
        Ok(file)
    }

    /// Turn a finished staging file into a tracked artifact
    ///
    /// # Errors
    ///
    /// Returns error if the staging file cannot be detached
    pub fn promote(
        &self,
        file: NamedTempFile,
        encoding: AudioEncoding,
        stage: Stage,
    ) -> Result<TempArtifact> {
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| Error::Io(e.error))?;
        Ok(TempArtifact::adopt(path, encoding, stage))
    }

    /// Write `bytes` to a new artifact
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn write(&self, bytes: &[u8], encoding: AudioEncoding, stage: Stage) -> Result<TempArtifact> {
        let mut file = self.staging_file(encoding)?;
        file.write_all(bytes)?;
        file.flush()?;
        self.promote(file, encoding, stage)
    }
}

/// The artifacts belonging to one pipeline run
///
/// Dropping the scope deletes everything still tracked.
#[derive(Debug, Default)]
pub struct ArtifactScope {
    artifacts: Vec<TempArtifact>,
}

impl ArtifactScope {
    /// Empty scope
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an artifact until the scope ends
    ///
    /// Returns `false` if the path is already tracked. The duplicate handle
    /// is released without deleting anything, so the file is removed once.
    pub fn track(&mut self, artifact: TempArtifact) -> bool {
        if self.contains(artifact.path()) {
            let _ = artifact.keep();
            return false;
        }
        self.artifacts.push(artifact);
        true
    }

    /// Whether `path` is tracked
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.artifacts.iter().any(|a| a.path() == path)
    }

    /// Hand a tracked artifact to a stage that will consume it
    pub fn take(&mut self, path: &Path) -> Option<TempArtifact> {
        let index = self.artifacts.iter().position(|a| a.path() == path)?;
        Some(self.artifacts.swap_remove(index))
    }

    /// Number of tracked artifacts
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Delete every tracked artifact now
    ///
    /// Returns how many files were removed.
    pub fn cleanup(&mut self) -> usize {
        self.artifacts
            .drain(..)
            .map(TempArtifact::remove)
            .filter(|removed| *removed)
            .count()
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        let removed = self.cleanup();
        if removed > 0 {
            tracing::debug!(removed, "artifact scope cleaned up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_artifact_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"data").unwrap();

        assert!(remove_artifact(&path).unwrap());
        assert!(!remove_artifact(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_store_names_have_prefix_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let artifact = store.write(b"abc", AudioEncoding::Mp3, Stage::Synthesize).unwrap();
        let name = artifact.path().file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with(ARTIFACT_PREFIX));
        assert!(name.ends_with(".mp3"));
        assert_eq!(artifact.stage(), Stage::Synthesize);
        assert_eq!(artifact.encoding(), AudioEncoding::Mp3);
    }

    #[test]
    fn test_store_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let a = store.write(b"1", AudioEncoding::PcmWav, Stage::Normalize).unwrap();
        let b = store.write(b"2", AudioEncoding::PcmWav, Stage::Normalize).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_artifact_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let artifact = store.write(b"x", AudioEncoding::PcmWav, Stage::Normalize).unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());

        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_keep_releases_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let artifact = store.write(b"x", AudioEncoding::Mp3, Stage::Synthesize).unwrap();
        let path = artifact.keep();
        assert!(path.exists());
        assert!(remove_artifact(&path).unwrap());
    }

    #[test]
    fn test_dropped_staging_file_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let staging = store.staging_file(AudioEncoding::PcmWav).unwrap();
        let path = staging.path().to_path_buf();
        drop(staging);

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_scope_dedups_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let artifact = store.write(b"x", AudioEncoding::Unknown, Stage::Inbound).unwrap();
        let path = artifact.path().to_path_buf();
        let duplicate = TempArtifact::adopt(path.clone(), AudioEncoding::Unknown, Stage::Inbound);

        let mut scope = ArtifactScope::new();
        assert!(scope.track(artifact));
        assert!(!scope.track(duplicate));
        assert_eq!(scope.len(), 1);
        assert!(path.exists());

        assert_eq!(scope.cleanup(), 1);
        assert!(!path.exists());
        assert!(scope.is_empty());
    }

    #[test]
    fn test_scope_drop_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let mut scope = ArtifactScope::new();
        scope.track(store.write(b"1", AudioEncoding::Unknown, Stage::Inbound).unwrap());
        scope.track(store.write(b"2", AudioEncoding::PcmWav, Stage::Normalize).unwrap());
        drop(scope);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_scope_take_transfers_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let artifact = store.write(b"1", AudioEncoding::PcmWav, Stage::Normalize).unwrap();
        let path = artifact.path().to_path_buf();

        let mut scope = ArtifactScope::new();
        scope.track(artifact);
        let taken = scope.take(&path).unwrap();
        drop(scope);

        assert!(path.exists());
        assert!(taken.remove());
        assert!(!path.exists());
    }

    #[test]
    fn test_encoding_from_mime() {
        assert_eq!(AudioEncoding::from_mime("audio/ogg"), AudioEncoding::OggOpus);
        assert_eq!(AudioEncoding::from_mime("audio/MPEG"), AudioEncoding::Mp3);
        assert_eq!(AudioEncoding::from_mime("audio/x-wav"), AudioEncoding::PcmWav);
        assert_eq!(AudioEncoding::from_mime("text/plain"), AudioEncoding::Unknown);
    }
}
