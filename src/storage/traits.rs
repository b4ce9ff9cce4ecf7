use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;

use crate::storage::cos::response::CosResponse;

/// 请求完成回调，同一路径上的所有调用者收到同一个响应
pub type CompletionCallback = Box<dyn FnOnce(&CosResponse) + Send>;

/// 传输层完成事件的发送端 / 接收端
pub type CompletionSender = tokio::sync::mpsc::UnboundedSender<TransportCompletion>;
pub type CompletionReceiver = tokio::sync::mpsc::UnboundedReceiver<TransportCompletion>;

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Head,
    Get,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Head => "HEAD",
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 上传源文件（已解析的本地路径及其大小）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub path: PathBuf,
    pub len: u64,
}

/// 请求体
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// 内存中的数据
    Bytes(Bytes),
    /// 以流的方式从本地文件读取
    File(UploadSource),
}

/// 统一的存储请求结构
#[derive(Debug, Clone)]
pub struct StorageRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: RequestBody,
}

impl StorageRequest {
    pub fn new(url: String) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: HashMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }
}

/// 传输层句柄，用于将异步完成事件关联回发起的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransportHandle(pub u64);

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 传输层完成事件，每次成功派发的请求恰好产生一个
#[derive(Debug, Clone, Default)]
pub struct TransportCompletion {
    pub handle: TransportHandle,
    /// 是否成功建立连接并收到完整响应
    pub connected: bool,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// 存储客户端错误类型
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// HTTP 传输接口
///
/// `dispatch` 只负责发起请求，不能阻塞调用线程；请求结束后（无论成功与否）
/// 通过 [`CompletionSender`] 投递且仅投递一次 [`TransportCompletion`]。
pub trait HttpTransport: Send + Sync {
    fn dispatch(&self, request: &StorageRequest) -> Result<TransportHandle, StorageError>;
}

/// 本地文件读写接口
pub trait FileIo: Send + Sync {
    /// 检查上传源文件是否可读，返回解析后的路径和文件大小
    fn open_source(&self, path: &str) -> Result<UploadSource, StorageError>;

    /// 将下载内容完整写入本地文件
    fn write_all(&self, path: &str, content: &[u8]) -> Result<(), StorageError>;
}

/// 时钟接口，签名使用的 Unix 秒
pub trait Clock: Send + Sync {
    fn now_unix_seconds(&self) -> i64;
}

/// 系统 UTC 时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// 请求与响应共有的“字节内容”访问能力
pub trait ByteContent {
    /// 对请求是要上传的内容，对响应是下载到的内容
    fn content(&self) -> &[u8];
}

/// 文件信息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileInfoType {
    ContentLength = 1 << 0,
    Md5 = 1 << 1,
    LastModifiedUtcTimestamp = 1 << 2,
}

impl FileInfoType {
    pub const ALL: [FileInfoType; 3] = [
        FileInfoType::ContentLength,
        FileInfoType::Md5,
        FileInfoType::LastModifiedUtcTimestamp,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }
}

/// 文件信息类型的组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileInfoMask(u8);

impl FileInfoMask {
    pub const NONE: FileInfoMask = FileInfoMask(0);

    /// 未定义的位会被忽略
    pub fn from_bits(bits: u8) -> Self {
        let known = FileInfoType::ALL.iter().fold(0u8, |acc, t| acc | t.bit());
        FileInfoMask(bits & known)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, info_type: FileInfoType) -> bool {
        self.0 & info_type.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = FileInfoType> + '_ {
        FileInfoType::ALL
            .iter()
            .copied()
            .filter(move |t| self.contains(*t))
    }
}

impl From<FileInfoType> for FileInfoMask {
    fn from(info_type: FileInfoType) -> Self {
        FileInfoMask(info_type.bit())
    }
}

impl BitOr for FileInfoType {
    type Output = FileInfoMask;

    fn bitor(self, rhs: FileInfoType) -> FileInfoMask {
        FileInfoMask(self.bit() | rhs.bit())
    }
}

impl BitOr<FileInfoType> for FileInfoMask {
    type Output = FileInfoMask;

    fn bitor(self, rhs: FileInfoType) -> FileInfoMask {
        FileInfoMask(self.0 | rhs.bit())
    }
}

fn default_sign_expiration_time() -> u32 {
    60
}

fn default_domain() -> String {
    "myqcloud.com".to_string()
}

/// 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosConfig {
    #[serde(default)]
    pub use_authorization: bool,
    /// 签名过期时长，单位为秒
    #[serde(default = "default_sign_expiration_time")]
    pub sign_expiration_time: u32,
    pub app_id: u64,
    pub bucket_name: String,
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub secret_key: String,
    pub region: String,
    #[serde(default)]
    pub cdn_host: Option<String>,
    /// 存储服务域名后缀
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for CosConfig {
    fn default() -> Self {
        Self {
            use_authorization: false,
            sign_expiration_time: default_sign_expiration_time(),
            app_id: 0,
            bucket_name: String::new(),
            secret_id: String::new(),
            secret_key: String::new(),
            region: String::new(),
            cdn_host: None,
            domain: default_domain(),
        }
    }
}

impl CosConfig {
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json)
            .map_err(|e| StorageError::InvalidConfig(format!("Failed to parse config: {}", e)))
    }

    /// 验证配置
    /// bucket / region 不做格式校验，错误的值会在请求时以网络错误的形式暴露
    pub fn validate_config(&self) -> Result<(), StorageError> {
        if self.use_authorization {
            if self.secret_id.is_empty() {
                return Err(StorageError::InvalidConfig(
                    "COS secret id is required when authorization is enabled".to_string(),
                ));
            }
            if self.secret_key.is_empty() {
                return Err(StorageError::InvalidConfig(
                    "COS secret key is required when authorization is enabled".to_string(),
                ));
            }
        }
        Ok(())
    }
}
