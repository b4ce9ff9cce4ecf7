use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};

use crate::storage::traits::{
    ByteContent, FileInfoMask, FileInfoType, HttpMethod, RequestBody, StorageRequest,
    TransportCompletion, TransportHandle,
};

/// 请求视图：返回给调用方，用于关联最终的回调
#[derive(Debug, Clone)]
pub struct CosRequest {
    handle: TransportHandle,
    method: HttpMethod,
    url: String,
    uri_path_name: String,
    content: Bytes,
}

impl CosRequest {
    pub(crate) fn new(handle: TransportHandle, uri_path_name: &str, request: &StorageRequest) -> Self {
        // 以文件流上传时内容不在内存中
        let content = match &request.body {
            RequestBody::Bytes(bytes) => bytes.clone(),
            RequestBody::Empty | RequestBody::File(_) => Bytes::new(),
        };

        Self {
            handle,
            method: request.method,
            url: request.url.clone(),
            uri_path_name: uri_path_name.to_string(),
            content,
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// 实际发出的 URL（可能已替换为 CDN 域名）
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn uri_path_name(&self) -> &str {
        &self.uri_path_name
    }
}

impl ByteContent for CosRequest {
    fn content(&self) -> &[u8] {
        &self.content
    }
}

/// 响应视图：每个完成的请求只构造一次，分发给所有等待者
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosResponse {
    connected: bool,
    succeeded: bool,
    status: u16,
    headers: HashMap<String, String>,
    body: Bytes,
    file_infos: BTreeMap<FileInfoType, String>,
}

impl CosResponse {
    /// 根据传输层结果判定成功与否，并提取请求的文件信息
    ///
    /// 只有连接成功且状态码在 2xx 范围内才算成功。
    /// 文件信息只对 HEAD 请求生成，且只包含 `file_info_mask` 中请求的字段。
    pub fn classify(
        completion: TransportCompletion,
        method: HttpMethod,
        file_info_mask: FileInfoMask,
    ) -> Self {
        let TransportCompletion {
            connected,
            status,
            headers,
            body,
            ..
        } = completion;

        let succeeded = connected && (200..300).contains(&status);

        let file_infos = if connected && method == HttpMethod::Head {
            generate_file_infos(&headers, file_info_mask)
        } else {
            BTreeMap::new()
        };

        Self {
            connected,
            succeeded,
            status,
            headers,
            body,
            file_infos,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.succeeded
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// 连接失败时返回 -1
    pub fn response_code(&self) -> i32 {
        if self.connected {
            i32::from(self.status)
        } else {
            -1
        }
    }

    /// 响应头（名称不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn content_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn file_info(&self, info_type: FileInfoType) -> Option<&str> {
        self.file_infos.get(&info_type).map(String::as_str)
    }

    pub fn file_infos(&self) -> &BTreeMap<FileInfoType, String> {
        &self.file_infos
    }
}

impl ByteContent for CosResponse {
    fn content(&self) -> &[u8] {
        &self.body
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// 缺失的大小 / ETag 头记为空串；无法解析的修改时间直接省略
fn generate_file_infos(
    headers: &HashMap<String, String>,
    file_info_mask: FileInfoMask,
) -> BTreeMap<FileInfoType, String> {
    let mut file_infos = BTreeMap::new();

    for info_type in file_info_mask.iter() {
        match info_type {
            FileInfoType::ContentLength => {
                let value = find_header(headers, "Content-Length").unwrap_or_default();
                file_infos.insert(info_type, value.to_string());
            }
            FileInfoType::Md5 => {
                let value = find_header(headers, "ETag").unwrap_or_default();
                file_infos.insert(info_type, value.to_string());
            }
            FileInfoType::LastModifiedUtcTimestamp => {
                let raw = find_header(headers, "Last-Modified").unwrap_or_default();
                match parse_http_date(raw) {
                    Some(timestamp) => {
                        file_infos.insert(info_type, timestamp.to_string());
                    }
                    None => log::error!("Failed to parse http date: {}", raw),
                }
            }
        }
    }

    file_infos
}

/// 解析 HTTP 日期为 Unix 时间戳（秒）
///
/// 支持 RFC 1123、RFC 850 和 asctime 三种格式
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.timestamp());
    }

    const LEGACY_FORMATS: [&str; 2] = [
        // RFC 850: Sunday, 06-Nov-94 08:49:37 GMT
        "%A, %d-%b-%y %H:%M:%S GMT",
        // asctime: Sun Nov  6 08:49:37 1994
        "%a %b %e %H:%M:%S %Y",
    ];

    LEGACY_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|date| date.and_utc().timestamp())
}
