use std::collections::HashMap;

/// 对路径名逐段进行URL编码，保留 '/'
///
/// 路径中的特殊字符必须编码，否则请求会失败
pub fn encode_path_name(uri_path_name: &str) -> String {
    uri_path_name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// 构建对象的完整 URL：`https://{host}{encoded_path}?{url_parameters}`
///
/// `url_parameters` 按原样拼接，不做编码
pub fn build_object_url(host: &str, uri_path_name: &str, url_parameters: &str) -> String {
    format!(
        "https://{}{}?{}",
        host,
        encode_path_name(uri_path_name),
        url_parameters
    )
}

/// 从 URL 中获取请求参数的键值对
///
/// 值不会进行URL解码，因此传入的参数不应该是经过编码的内容。
/// 没有值的参数（如 `?acl&`）记为空串。
pub fn parse_url_parameters(url: &str) -> HashMap<String, String> {
    let Some((_, query)) = url.split_once('?') else {
        return HashMap::new();
    };

    query
        .split('&')
        .filter(|element| !element.is_empty())
        .map(|element| match element.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (element.to_string(), String::new()),
        })
        .collect()
}

/// 将 URL 中的源站域名替换为 CDN 域名
///
/// 只能在签名之后调用：CDN 会原样转发 `Host` 头，签名必须基于源站域名
pub fn replace_with_cdn_host(url: &str, host: &str, cdn_host: &str) -> String {
    if cdn_host.is_empty() {
        return url.to_string();
    }
    url.replace(host, cdn_host)
}
