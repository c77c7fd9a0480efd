use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::config::data_dir;
use crate::error::PipelineError;

const TEMP_PREFIX: &str = ".agridata-obj";

/// Durable blob storage addressed by `(bucket, key)`.
///
/// Objects are write-once: writing an existing key fails with
/// [`PipelineError::ObjectExists`].
pub trait RawStore: Send + Sync {
    fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError>;
    fn write(&self, bucket: &str, key: &str, content: &[u8]) -> Result<(), PipelineError>;
    fn list(&self, bucket: &str) -> Result<Vec<String>, PipelineError>;
}

impl<T: RawStore + ?Sized> RawStore for &T {
    fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError> {
        (**self).read(bucket, key)
    }

    fn write(&self, bucket: &str, key: &str, content: &[u8]) -> Result<(), PipelineError> {
        (**self).write(bucket, key, content)
    }

    fn list(&self, bucket: &str) -> Result<Vec<String>, PipelineError> {
        (**self).list(bucket)
    }
}

/// Filesystem-backed raw store laid out as `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsRawStore {
    root: Utf8PathBuf,
}

impl FsRawStore {
    pub fn new() -> Result<Self, PipelineError> {
        Ok(Self {
            root: Self::default_root()?,
        })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Result<Utf8PathBuf, PipelineError> {
        Ok(data_dir()?.join("raw"))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> Result<Utf8PathBuf, PipelineError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let mut path = self.root.join(bucket);
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

impl RawStore for FsRawStore {
    fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError> {
        let path = self.object_path(bucket, key)?;
        fs::read(path.as_std_path()).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => PipelineError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => PipelineError::Filesystem(format!("read {path}: {err}")),
        })
    }

    fn write(&self, bucket: &str, key: &str, content: &[u8]) -> Result<(), PipelineError> {
        let path = self.object_path(bucket, key)?;
        let exists = || PipelineError::ObjectExists {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        if path.as_std_path().exists() {
            return Err(exists());
        }
        let parent = path
            .parent()
            .ok_or_else(|| PipelineError::Filesystem("invalid object path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;

        let mut temp = Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        temp.persist_noclobber(path.as_std_path())
            .map_err(|err| match err.error.kind() {
                io::ErrorKind::AlreadyExists => exists(),
                _ => PipelineError::Filesystem(err.error.to_string()),
            })?;
        Ok(())
    }

    fn list(&self, bucket: &str) -> Result<Vec<String>, PipelineError> {
        validate_bucket(bucket)?;
        let bucket_root = self.root.join(bucket);
        if !bucket_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for path in walk_dir(bucket_root.as_std_path())? {
            if !path.is_file() {
                continue;
            }
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(TEMP_PREFIX))
                .unwrap_or(false);
            if is_temp {
                continue;
            }
            let Ok(relative) = path.strip_prefix(bucket_root.as_std_path()) else {
                continue;
            };
            let segments = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>();
            keys.push(segments.join("/"));
        }
        keys.sort();
        Ok(keys)
    }
}

fn validate_bucket(bucket: &str) -> Result<(), PipelineError> {
    let is_valid = !bucket.is_empty()
        && bucket != "."
        && bucket != ".."
        && !bucket.contains(['/', '\\']);
    if !is_valid {
        return Err(PipelineError::InvalidObjectKey(format!("bucket `{bucket}`")));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), PipelineError> {
    let is_valid = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !is_valid {
        return Err(PipelineError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
