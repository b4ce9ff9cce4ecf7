use std::path::PathBuf;

use super::traits::{FileIo, StorageError, UploadSource};
use crate::utils::path_utils::PathUtils;

/// 本机文件系统读写
///
/// 支持绝对路径、相对路径（相对于 `root_path` 或当前目录）、`~` 以及 file:// 协议
#[derive(Debug, Clone, Default)]
pub struct LocalFileIo {
    root_path: Option<PathBuf>,
}

impl LocalFileIo {
    pub fn new() -> Self {
        Self { root_path: None }
    }

    pub fn with_root(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: Some(root_path.into()),
        }
    }

    /// 构建完整路径
    fn build_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let actual_path = path.strip_prefix("file://").unwrap_or(path);
        if actual_path.is_empty() {
            return Err(StorageError::InvalidPath("Local path is empty".to_string()));
        }

        if actual_path.starts_with('~') {
            return PathUtils::expand_home_dir(actual_path);
        }

        let path_buf = PathBuf::from(actual_path);
        if path_buf.is_absolute() {
            return Ok(path_buf);
        }

        Ok(match &self.root_path {
            Some(root) => root.join(actual_path),
            None => path_buf,
        })
    }
}

impl FileIo for LocalFileIo {
    fn open_source(&self, path: &str) -> Result<UploadSource, StorageError> {
        let full_path = self.build_path(path)?;

        let metadata = std::fs::metadata(&full_path).map_err(|e| {
            StorageError::IoError(format!("Failed to stat {}: {}", full_path.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(StorageError::IoError(format!(
                "Not a regular file: {}",
                full_path.display()
            )));
        }

        // 提前确认文件可读，真正的读取在传输层以流的方式进行
        std::fs::File::open(&full_path).map_err(|e| {
            StorageError::IoError(format!("Failed to open {}: {}", full_path.display(), e))
        })?;

        Ok(UploadSource {
            path: full_path,
            len: metadata.len(),
        })
    }

    fn write_all(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        let full_path = self.build_path(path)?;

        if let Some(parent) = full_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::IoError(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        std::fs::write(&full_path, content).map_err(|e| {
            StorageError::IoError(format!("Failed to write {}: {}", full_path.display(), e))
        })
    }
}
