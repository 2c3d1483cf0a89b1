//! Request payload sources.
//!
//! A [`PayloadSource`] hands out the bytes each request uploads. Sources are
//! shared by every execution unit, so they must be `Send + Sync`; each call
//! happens on the unit's own thread, so a source may do blocking file I/O.
//!
//! # Example
//! ```no_run
//! use openloop::payload::{DirectoryPayloadSource, PayloadSource};
//!
//! let source = DirectoryPayloadSource::from_dir("test_images").unwrap();
//! let payload = source.next_payload().unwrap();
//! println!("{} is {} bytes", payload.id, payload.bytes.len());
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

/// File extensions picked up by [`DirectoryPayloadSource`].
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Errors that can occur when producing a payload.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Failed to read payload file: {0}")]
    Io(#[from] std::io::Error),

    #[error("No image files found in {0}")]
    EmptyData(PathBuf),

    #[error("No data available")]
    NoDataAvailable,
}

/// One request body: an identifier (used as the upload filename and in
/// classifier logs) and the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub id: String,
    pub bytes: Vec<u8>,
}

/// Produces the payload for the next request.
pub trait PayloadSource: Send + Sync {
    fn next_payload(&self) -> Result<Payload, PayloadError>;
}

/// Picks a random image from a directory for every request.
///
/// The directory is listed once at construction; files are read on demand.
#[derive(Debug)]
pub struct DirectoryPayloadSource {
    paths: Vec<PathBuf>,
    rng: Mutex<StdRng>,
}

impl DirectoryPayloadSource {
    /// List the images under `dir`, seeding the picker from OS entropy.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, PayloadError> {
        Self::with_rng(dir, StdRng::from_entropy())
    }

    /// List the images under `dir` with a reproducible pick order.
    pub fn from_dir_seeded<P: AsRef<Path>>(dir: P, seed: u64) -> Result<Self, PayloadError> {
        Self::with_rng(dir, StdRng::seed_from_u64(seed))
    }

    fn with_rng<P: AsRef<Path>>(dir: P, rng: StdRng) -> Result<Self, PayloadError> {
        let dir = dir.as_ref();

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(PayloadError::EmptyData(dir.to_path_buf()));
        }

        // read_dir order is platform dependent
        paths.sort();

        info!(dir = ?dir, images = paths.len(), "Loaded payload directory");

        Ok(Self {
            paths,
            rng: Mutex::new(rng),
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl PayloadSource for DirectoryPayloadSource {
    fn next_payload(&self) -> Result<Payload, PayloadError> {
        let index = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(0..self.paths.len())
        };
        let path = &self.paths[index];

        let bytes = fs::read(path)?;
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!(id = %id, size = bytes.len(), "Selected payload");

        Ok(Payload { id, bytes })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Returns the same payload for every request.
#[derive(Debug, Clone)]
pub struct StaticPayloadSource {
    payload: Payload,
}

impl StaticPayloadSource {
    pub fn new(id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Payload {
                id: id.into(),
                bytes: bytes.into(),
            },
        }
    }
}

impl PayloadSource for StaticPayloadSource {
    fn next_payload(&self) -> Result<Payload, PayloadError> {
        Ok(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        dir
    }

    #[test]
    fn only_image_files_are_listed() {
        let dir = image_dir(&[
            ("cat.jpg", "cat"),
            ("dog.JPEG", "dog"),
            ("bird.png", "bird"),
            ("notes.txt", "nope"),
            ("archive.jpg.gz", "nope"),
        ]);

        let source = DirectoryPayloadSource::from_dir(dir.path()).unwrap();
        assert_eq!(source.len(), 3);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = image_dir(&[("readme.md", "# hi")]);
        let err = DirectoryPayloadSource::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, PayloadError::EmptyData(_)));
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = DirectoryPayloadSource::from_dir("/definitely/not/here").unwrap_err();
        assert!(matches!(err, PayloadError::Io(_)));
    }

    #[test]
    fn payload_id_is_file_name() {
        let dir = image_dir(&[("only.png", "PNGDATA")]);
        let source = DirectoryPayloadSource::from_dir(dir.path()).unwrap();

        let payload = source.next_payload().unwrap();
        assert_eq!(payload.id, "only.png");
        assert_eq!(payload.bytes, b"PNGDATA");
    }

    #[test]
    fn seeded_sources_pick_the_same_sequence() {
        let dir = image_dir(&[("a.jpg", "a"), ("b.jpg", "b"), ("c.jpg", "c")]);
        let first = DirectoryPayloadSource::from_dir_seeded(dir.path(), 42).unwrap();
        let second = DirectoryPayloadSource::from_dir_seeded(dir.path(), 42).unwrap();

        for _ in 0..20 {
            assert_eq!(
                first.next_payload().unwrap().id,
                second.next_payload().unwrap().id
            );
        }
    }

    #[test]
    fn deleted_file_surfaces_as_error() {
        let dir = image_dir(&[("gone.jpg", "x")]);
        let source = DirectoryPayloadSource::from_dir(dir.path()).unwrap();
        fs::remove_file(dir.path().join("gone.jpg")).unwrap();

        assert!(matches!(source.next_payload(), Err(PayloadError::Io(_))));
    }

    #[test]
    fn static_source_repeats_payload() {
        let source = StaticPayloadSource::new("fixed.jpg", vec![1, 2, 3]);
        assert_eq!(source.next_payload().unwrap(), source.next_payload().unwrap());
    }
}
