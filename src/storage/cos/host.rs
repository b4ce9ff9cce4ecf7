use std::sync::RwLock;

/// COS 访问端点
///
/// `host` 在构造时根据 AppId / 存储桶 / 地域生成，之后不再变化，签名始终使用它。
/// `cdn_host` 只替换实际发出请求的目标地址，对签名不可见。
#[derive(Debug)]
pub struct CosEndpoint {
    host: String,
    cdn_host: RwLock<Option<String>>,
}

impl CosEndpoint {
    pub fn new(app_id: u64, bucket_name: &str, region: &str, domain: &str) -> Self {
        Self {
            host: Self::resolve_host(app_id, bucket_name, region, domain),
            cdn_host: RwLock::new(None),
        }
    }

    /// Host 的形式为：`<BucketName-APPID>.cos.<Region>.<Domain>`
    /// 不校验存储桶和地域的格式
    pub fn resolve_host(app_id: u64, bucket_name: &str, region: &str, domain: &str) -> String {
        format!("{}-{}.cos.{}.{}", bucket_name, app_id, region, domain)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// 设置 CDN 域名，传入 `None` 或空串表示关闭
    pub fn set_cdn_host(&self, cdn_host: Option<String>) {
        let cdn_host = cdn_host.filter(|h| !h.is_empty());
        let mut guard = self.cdn_host.write().unwrap_or_else(|e| e.into_inner());
        *guard = cdn_host;
    }

    pub fn cdn_host(&self) -> Option<String> {
        self.cdn_host
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
