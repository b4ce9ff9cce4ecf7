//! 基于 reqwest 的 HTTP 传输实现
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Body, Client, Method};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::storage::traits::{
    CompletionReceiver, CompletionSender, HttpMethod, HttpTransport, RequestBody, StorageError,
    StorageRequest, TransportCompletion, TransportHandle,
};

/// HTTP传输配置
#[derive(Debug, Clone, Default)]
pub struct HttpTransportConfig {
    /// 超时设置（秒），为空时不限制
    pub timeout_seconds: Option<u64>,
}

/// 原始响应：状态码、响应头、响应体
type RawResponse = (u16, HashMap<String, String>, Bytes);

/// reqwest 传输层
///
/// 每次派发在 tokio 运行时上启动一个任务，任务结束时向完成通道发送且只发送一次结果。
pub struct ReqwestTransport {
    client: Client,
    config: HttpTransportConfig,
    runtime: Handle,
    completions: CompletionSender,
    next_handle: AtomicU64,
}

impl ReqwestTransport {
    /// 在当前 tokio 运行时内创建，返回传输层和完成事件接收端
    pub fn new(config: HttpTransportConfig) -> Result<(Self, CompletionReceiver), StorageError> {
        let runtime = Handle::try_current().map_err(|e| {
            StorageError::DispatchFailed(format!("No tokio runtime available: {}", e))
        })?;
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(
        config: HttpTransportConfig,
        runtime: Handle,
    ) -> Result<(Self, CompletionReceiver), StorageError> {
        let client = Client::builder().build().map_err(|e| {
            StorageError::NetworkError(format!("Failed to build HTTP client: {}", e))
        })?;
        let (completions, receiver) = tokio::sync::mpsc::unbounded_channel();

        Ok((
            Self {
                client,
                config,
                runtime,
                completions,
                next_handle: AtomicU64::new(1),
            },
            receiver,
        ))
    }

    async fn execute(
        client: Client,
        request: StorageRequest,
        timeout_seconds: Option<u64>,
    ) -> Result<RawResponse, StorageError> {
        let method = match request.method {
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Get => Method::GET,
            HttpMethod::Put => Method::PUT,
        };

        let mut builder = client.request(method, &request.url);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        if let Some(timeout) = timeout_seconds {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::File(source) => {
                let file = tokio::fs::File::open(&source.path).await.map_err(|e| {
                    StorageError::IoError(format!(
                        "Failed to open file {}: {}",
                        source.path.display(),
                        e
                    ))
                })?;
                // Content-Length 在签名之后才加入，不参与签名
                builder
                    .header("Content-Length", source.len.to_string())
                    .body(Body::wrap_stream(ReaderStream::new(file)))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| StorageError::NetworkError(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| StorageError::NetworkError(format!("Failed to read response body: {}", e)))?;

        Ok((status, headers, body))
    }
}

/// 同名响应头按出现顺序以 ", " 合并；非可见 ASCII 的值按 UTF-8 宽松解码
fn collect_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();

    for (name, value) in header_map {
        let value = match value.to_str() {
            Ok(value) => value.to_string(),
            Err(_) => {
                log::warn!("Header {} is not visible ASCII, decoding lossily", name);
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            }
        };

        headers
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    headers
}

impl HttpTransport for ReqwestTransport {
    fn dispatch(&self, request: &StorageRequest) -> Result<TransportHandle, StorageError> {
        Url::parse(&request.url).map_err(|e| {
            StorageError::DispatchFailed(format!("Invalid URL {}: {}", request.url, e))
        })?;

        if self.completions.is_closed() {
            return Err(StorageError::DispatchFailed(
                "Completion receiver has been dropped".to_string(),
            ));
        }

        let handle = TransportHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let client = self.client.clone();
        let request = request.clone();
        let timeout_seconds = self.config.timeout_seconds;
        let completions = self.completions.clone();

        self.runtime.spawn(async move {
            let completion = match Self::execute(client, request, timeout_seconds).await {
                Ok((status, headers, body)) => TransportCompletion {
                    handle,
                    connected: true,
                    status,
                    headers,
                    body,
                },
                Err(e) => {
                    log::error!("Transport request {} failed: {}", handle, e);
                    TransportCompletion {
                        handle,
                        ..Default::default()
                    }
                }
            };

            if completions.send(completion).is_err() {
                log::warn!("Completion for request {} dropped: receiver closed", handle);
            }
        });

        Ok(handle)
    }
}
