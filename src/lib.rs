//! 腾讯云对象存储（COS）辅助库
//!
//! 提供请求签名、存储桶域名解析、按路径去重的请求协调以及响应分类。
//!
//! ```no_run
//! use std::sync::Arc;
//! use cos_helper::{
//!     CosClient, CosConfig, CosResponse, FileInfoType, HttpTransportConfig, LocalFileIo, ReqwestTransport,
//! };
//!
//! # async fn run() -> Result<(), cos_helper::StorageError> {
//! let config = CosConfig::from_json(r#"{"app_id": 1250000000, "bucket_name": "bucket",
//!     "region": "ap-guangzhou", "secret_id": "AKID", "secret_key": "secret"}"#)?;
//! let (transport, completions) = ReqwestTransport::new(HttpTransportConfig::default())?;
//! let client = Arc::new(CosClient::new(config, Arc::new(transport), Arc::new(LocalFileIo::new()))?);
//!
//! client.get_file_info(
//!     "/v.txt",
//!     "",
//!     FileInfoType::ContentLength | FileInfoType::Md5,
//!     Some(Box::new(|response: &CosResponse| {
//!         println!("size: {:?}", response.file_info(FileInfoType::ContentLength));
//!     })),
//! );
//! client.drive(completions).await;
//! # Ok(())
//! # }
//! ```
pub mod storage;
pub mod utils; // 通用工具模块

pub use storage::{
    ByteContent, Clock, CompletionCallback, CompletionReceiver, CompletionSender, CosClient,
    CosConfig, CosEndpoint, CosRequest, CosResponse, FileInfoMask, FileInfoType, FileIo,
    HttpMethod, HttpTransport, HttpTransportConfig, LocalFileIo, ReqwestTransport, RequestBody,
    StorageError, StorageRequest, SystemClock, TransportCompletion, TransportHandle, UploadSource,
};
