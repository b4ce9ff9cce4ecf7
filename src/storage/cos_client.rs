use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;

use crate::storage::cos::{
    build_cos_auth_headers, build_object_url, parse_url_parameters, replace_with_cdn_host,
    CosCredentials, CosEndpoint, CosRequest, CosResponse, SignedRequestContext,
};
use crate::storage::traits::{
    ByteContent, Clock, CompletionCallback, CompletionReceiver, CosConfig, FileInfoMask, FileIo,
    HttpMethod, HttpTransport, RequestBody, StorageError, StorageRequest, SystemClock,
    TransportCompletion, TransportHandle,
};

/// 同一路径上正在进行中的操作
struct PendingOperation {
    uri_path_name: String,
    kind: OperationKind,
    request: CosRequest,
    waiters: Vec<CompletionCallback>,
}

/// 进行中请求的登记表
///
/// `by_path` 与 `by_handle` 只能通过 `insert` / `remove_by_handle` 一起修改
#[derive(Default)]
struct RequestRegistry {
    by_path: HashMap<String, TransportHandle>,
    by_handle: HashMap<TransportHandle, PendingOperation>,
}

impl RequestRegistry {
    fn find_by_path(&mut self, uri_path_name: &str) -> Option<&mut PendingOperation> {
        let handle = self.by_path.get(uri_path_name)?;
        self.by_handle.get_mut(handle)
    }

    fn insert(&mut self, operation: PendingOperation) {
        let handle = operation.request.handle();
        self.by_path.insert(operation.uri_path_name.clone(), handle);
        self.by_handle.insert(handle, operation);
    }

    fn remove_by_handle(&mut self, handle: TransportHandle) -> Option<PendingOperation> {
        let operation = self.by_handle.remove(&handle)?;
        if self.by_path.get(&operation.uri_path_name) == Some(&handle) {
            self.by_path.remove(&operation.uri_path_name);
        }
        Some(operation)
    }

    fn len(&self) -> usize {
        self.by_handle.len()
    }
}

/// 操作种类
#[derive(Debug, Clone, PartialEq, Eq)]
enum OperationKind {
    GetFileInfo(FileInfoMask),
    /// 下载后的保存路径
    Download(Option<String>),
    /// 上传的源文件路径
    Upload(Option<String>),
}

impl OperationKind {
    /// 上传始终直连源站
    fn uses_cdn(&self) -> bool {
        !matches!(self, OperationKind::Upload(_))
    }

    fn file_info_mask(&self) -> FileInfoMask {
        match self {
            OperationKind::GetFileInfo(mask) => *mask,
            OperationKind::Download(_) | OperationKind::Upload(_) => FileInfoMask::NONE,
        }
    }

    /// 下载内容的保存路径
    fn save_path(&self) -> Option<&str> {
        match self {
            OperationKind::Download(path) => path.as_deref(),
            OperationKind::GetFileInfo(_) | OperationKind::Upload(_) => None,
        }
    }
}

/// 腾讯云COS客户端
///
/// 对同一路径的并发请求只发起一次网络调用，完成后按登记顺序把同一个响应分发给所有调用者。
/// 所有入口都不会阻塞，结果只通过回调返回。
pub struct CosClient {
    endpoint: CosEndpoint,
    credentials: CosCredentials,
    use_authorization: bool,
    transport: Arc<dyn HttpTransport>,
    file_io: Arc<dyn FileIo>,
    clock: Arc<dyn Clock>,
    registry: Mutex<RequestRegistry>,
}

impl CosClient {
    pub fn new(
        config: CosConfig,
        transport: Arc<dyn HttpTransport>,
        file_io: Arc<dyn FileIo>,
    ) -> Result<Self, StorageError> {
        Self::with_clock(config, transport, file_io, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CosConfig,
        transport: Arc<dyn HttpTransport>,
        file_io: Arc<dyn FileIo>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        config.validate_config()?;

        let endpoint = CosEndpoint::new(
            config.app_id,
            &config.bucket_name,
            &config.region,
            &config.domain,
        );
        endpoint.set_cdn_host(config.cdn_host.clone());

        log::info!("COS client initialized for host: {}", endpoint.host());

        Ok(Self {
            endpoint,
            credentials: CosCredentials {
                secret_id: config.secret_id,
                secret_key: config.secret_key,
                sign_expiration_secs: config.sign_expiration_time,
            },
            use_authorization: config.use_authorization,
            transport,
            file_io,
            clock,
            registry: Mutex::new(RequestRegistry::default()),
        })
    }

    /// 源站域名，签名始终使用它
    pub fn host(&self) -> &str {
        self.endpoint.host()
    }

    /// 设置 CDN 域名，`None` 或空串表示关闭
    pub fn set_cdn_host(&self, cdn_host: Option<String>) {
        self.endpoint.set_cdn_host(cdn_host);
    }

    /// 当前进行中的请求数量（按路径去重后）
    pub fn pending_count(&self) -> usize {
        self.lock_registry().len()
    }

    /// 从服务器获取文件信息（避免下载文件）
    ///
    /// - `uri_path_name`: 服务器上的文件路径名，需要以 '/' 开头，相对于存储桶，如 "/v.txt"
    /// - `url_parameters`: 请求参数，原样添加到路径之后，如 "acl" -> https://host/v.txt?acl
    /// - `file_info_mask`: 需要获取的信息类型
    pub fn get_file_info(
        &self,
        uri_path_name: &str,
        url_parameters: &str,
        file_info_mask: FileInfoMask,
        on_complete: Option<CompletionCallback>,
    ) -> Option<CosRequest> {
        self.submit(
            uri_path_name,
            url_parameters,
            OperationKind::GetFileInfo(file_info_mask),
            |request| {
                request.method = HttpMethod::Head;
                Ok(())
            },
            on_complete,
        )
    }

    /// 从服务器下载文件
    ///
    /// `saved_file_path_name` 为空时不保存下载的文件，内容仍可从响应中取得
    pub fn download_file(
        &self,
        uri_path_name: &str,
        url_parameters: &str,
        saved_file_path_name: &str,
        on_complete: Option<CompletionCallback>,
    ) -> Option<CosRequest> {
        let local_file_path =
            Some(saved_file_path_name.to_string()).filter(|path| !path.is_empty());

        self.submit(
            uri_path_name,
            url_parameters,
            OperationKind::Download(local_file_path),
            |request| {
                request.method = HttpMethod::Get;
                Ok(())
            },
            on_complete,
        )
    }

    /// 上传本地文件到服务器，文件内容以流的方式发送
    pub fn upload_file(
        &self,
        file_path_name: &str,
        uri_path_name: &str,
        url_parameters: &str,
        on_complete: Option<CompletionCallback>,
    ) -> Option<CosRequest> {
        if file_path_name.is_empty() {
            log::warn!("Param file_path_name is empty.");
            return None;
        }

        self.submit(
            uri_path_name,
            url_parameters,
            OperationKind::Upload(Some(file_path_name.to_string())),
            |request| {
                request.method = HttpMethod::Put;
                let source = self.file_io.open_source(file_path_name).map_err(|e| {
                    log::error!("Failed to stream from file: {}: {}", file_path_name, e);
                    e
                })?;
                request.body = RequestBody::File(source);
                Ok(())
            },
            on_complete,
        )
    }

    /// 上传内存中的数据到服务器
    pub fn upload_content(
        &self,
        content: Bytes,
        uri_path_name: &str,
        url_parameters: &str,
        on_complete: Option<CompletionCallback>,
    ) -> Option<CosRequest> {
        self.submit(
            uri_path_name,
            url_parameters,
            OperationKind::Upload(None),
            move |request| {
                request.method = HttpMethod::Put;
                request.body = RequestBody::Bytes(content);
                Ok(())
            },
            on_complete,
        )
    }

    /// 处理传输层的完成事件
    ///
    /// 找不到对应请求时记录错误并丢弃。回调在登记项移除、锁释放之后执行，
    /// 因此回调中可以再次发起请求。
    ///
    /// 需要保存下载内容时，在 tokio 运行时内写文件交给阻塞线程池，写完后才通知等待者，
    /// 不占用完成事件循环；运行时之外直接同步写入。
    pub fn handle_completion(&self, completion: TransportCompletion) {
        let handle = completion.handle;
        let Some(operation) = self.lock_registry().remove_by_handle(handle) else {
            log::error!("Failed to find pending request for transport handle {}", handle);
            return;
        };

        let request = &operation.request;
        let response =
            CosResponse::classify(completion, request.method(), operation.kind.file_info_mask());

        if !response.is_connected() {
            log::error!("Failed to connect for URL: {}", request.url());
        } else if !response.is_ok() {
            log::error!(
                "Failed to request URL: {}. ResponseCode: {}.\nError: {}",
                request.url(),
                response.response_code(),
                response.content_as_string()
            );
        }

        log::debug!(
            "Request {} {} completed with {} waiter(s)",
            request.method(),
            operation.uri_path_name,
            operation.waiters.len()
        );

        let save_path = operation
            .kind
            .save_path()
            .filter(|_| response.is_ok() && request.method() == HttpMethod::Get)
            .map(str::to_string);

        match save_path {
            Some(local_file_path) => {
                self.save_then_notify(local_file_path, response, operation.waiters)
            }
            None => notify_waiters(&response, operation.waiters),
        }
    }

    /// 持续处理完成事件，直到所有发送端关闭
    pub async fn drive(&self, mut completions: CompletionReceiver) {
        while let Some(completion) = completions.recv().await {
            self.handle_completion(completion);
        }
        log::debug!("Completion channel closed for host: {}", self.host());
    }

    // === 私有辅助方法 ===

    /// 提交请求
    ///
    /// 同一路径已在进行中时只追加回调并返回已有的请求，不会再次发起网络调用。
    /// 路径非法、填充请求失败或派发失败时返回 `None`，且不登记任何内容。
    fn submit<F>(
        &self,
        uri_path_name: &str,
        url_parameters: &str,
        kind: OperationKind,
        fill_request: F,
        on_complete: Option<CompletionCallback>,
    ) -> Option<CosRequest>
    where
        F: FnOnce(&mut StorageRequest) -> Result<(), StorageError>,
    {
        if uri_path_name.is_empty() || !uri_path_name.starts_with('/') {
            log::warn!("Invalid param uri_path_name: {}", uri_path_name);
            return None;
        }

        // 去重检查与登记必须在同一把锁内完成
        let mut registry = self.lock_registry();

        if let Some(operation) = registry.find_by_path(uri_path_name) {
            log::debug!("URI is processing, joining request: {}", uri_path_name);
            if operation.kind != kind {
                log::warn!(
                    "Request {:?} for {} joined pending {:?}; only the pending request's result is delivered",
                    kind,
                    uri_path_name,
                    operation.kind
                );
            }
            operation.waiters.extend(on_complete);
            return Some(operation.request.clone());
        }

        let request = match self.prepare_request(uri_path_name, url_parameters, &kind, fill_request) {
            Ok(request) => request,
            Err(e) => {
                log::error!("Failed to start processing http request!!! {}", e);
                return None;
            }
        };

        let handle = match self.transport.dispatch(&request) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to start processing http request!!! {}", e);
                return None;
            }
        };

        let cos_request = CosRequest::new(handle, uri_path_name, &request);
        registry.insert(PendingOperation {
            uri_path_name: uri_path_name.to_string(),
            kind,
            request: cos_request.clone(),
            waiters: on_complete.into_iter().collect(),
        });

        log::debug!("Dispatched {} {} as {}", request.method, request.url, handle);

        Some(cos_request)
    }

    /// 构建 URL、填充请求、签名，最后才替换 CDN 域名
    fn prepare_request<F>(
        &self,
        uri_path_name: &str,
        url_parameters: &str,
        kind: &OperationKind,
        fill_request: F,
    ) -> Result<StorageRequest, StorageError>
    where
        F: FnOnce(&mut StorageRequest) -> Result<(), StorageError>,
    {
        let host = self.endpoint.host();
        let mut request = StorageRequest::new(build_object_url(host, uri_path_name, url_parameters));
        request.set_header("Host", host);

        fill_request(&mut request)?;

        if self.use_authorization {
            let url_params = parse_url_parameters(&request.url);
            let context = SignedRequestContext {
                method: request.method.as_str(),
                uri_path_name,
                url_parameters: &url_params,
                headers: &request.headers,
            };
            let signed_headers =
                build_cos_auth_headers(&self.credentials, &context, self.clock.as_ref());
            request.headers = signed_headers;
        }

        if kind.uses_cdn() {
            if let Some(cdn_host) = self.endpoint.cdn_host() {
                request.url = replace_with_cdn_host(&request.url, host, &cdn_host);
            }
        }

        Ok(request)
    }

    fn save_then_notify(
        &self,
        local_file_path: String,
        response: CosResponse,
        waiters: Vec<CompletionCallback>,
    ) {
        let file_io = Arc::clone(&self.file_io);

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || {
                    save_response_content(file_io.as_ref(), &local_file_path, &response);
                    notify_waiters(&response, waiters);
                });
            }
            Err(_) => {
                save_response_content(file_io.as_ref(), &local_file_path, &response);
                notify_waiters(&response, waiters);
            }
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, RequestRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 保存下载内容；失败只记录日志，不改变请求结果
fn save_response_content(file_io: &dyn FileIo, local_file_path: &str, response: &CosResponse) {
    match file_io.write_all(local_file_path, response.content()) {
        Ok(()) => log::info!("Saved file: {}", local_file_path),
        Err(e) => log::error!("Failed to save file: {}: {}", local_file_path, e),
    }
}

fn notify_waiters(response: &CosResponse, waiters: Vec<CompletionCallback>) {
    for on_complete in waiters {
        on_complete(response);
    }
}
