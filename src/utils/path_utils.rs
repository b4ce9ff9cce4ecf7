use crate::storage::traits::StorageError;
use std::path::PathBuf;

/// 路径工具函数
pub struct PathUtils;

impl PathUtils {
    /// 展开路径中的 ~ 到用户主目录
    ///
    /// # 示例
    /// ```rust
    /// // "~" -> "/Users/username"
    /// // "~/saved/v.txt" -> "/Users/username/saved/v.txt"
    /// // "/absolute/path" -> "/absolute/path" (不变)
    /// ```
    pub fn expand_home_dir(path: &str) -> Result<PathBuf, StorageError> {
        if !path.starts_with('~') {
            return Ok(PathBuf::from(path));
        }

        let home_dir = dirs::home_dir().ok_or_else(|| {
            StorageError::IoError("Cannot determine home directory".to_string())
        })?;

        if path == "~" {
            Ok(home_dir)
        } else if let Some(stripped) = path.strip_prefix("~/") {
            Ok(home_dir.join(stripped))
        } else {
            // ~username 形式不支持，原样返回
            Ok(PathBuf::from(path))
        }
    }
}
