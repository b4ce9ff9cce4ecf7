use crate::storage::traits::Clock;
use crate::utils::crypto::{hmac_sha1_hex, sha1_hex};
use std::collections::{BTreeMap, HashMap};

/// 腾讯云COS签名所需的凭证
#[derive(Debug, Clone)]
pub struct CosCredentials {
    pub secret_id: String,
    pub secret_key: String,
    /// 签名有效时长，单位为秒
    pub sign_expiration_secs: u32,
}

/// 参与签名的请求信息
#[derive(Debug, Clone, Copy)]
pub struct SignedRequestContext<'a> {
    pub method: &'a str,
    /// 未编码的路径名，以 '/' 开头
    pub uri_path_name: &'a str,
    pub url_parameters: &'a HashMap<String, String>,
    pub headers: &'a HashMap<String, String>,
}

/// 根据键值对生成两个经过URL编码的串
///
/// 返回 `(key_list, encoded_string)`：
/// - key_list 的格式为 `key1;key2;key3`
/// - encoded_string 的格式为 `key1=value1&key2=value2&key3=value3`
///
/// 键与值分别编码，编码后的键转为小写并按字节序升序排列。
/// 空输入返回 `None`，调用方按空串处理。
pub fn canonicalize(pairs: &HashMap<String, String>) -> Option<(String, String)> {
    if pairs.is_empty() {
        return None;
    }

    let sorted: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).to_lowercase(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();

    let key_list = sorted.keys().map(String::as_str).collect::<Vec<_>>().join(";");
    let encoded_string = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    Some((key_list, encoded_string))
}

/// 生成 KeyTime，格式为 `{start};{end}`
fn generate_key_time(start: i64, sign_expiration_secs: u32) -> String {
    let end = start + i64::from(sign_expiration_secs);
    format!("{};{}", start, end)
}

/// 生成COS请求签名
///
/// 算法见 <https://cloud.tencent.com/document/product/436/7778>：
/// 1. KeyTime = `{start};{end}`
/// 2. SignKey = HMAC-SHA1(SecretKey, KeyTime)
/// 3. HttpString = `method\npath\nparams\nheaders\n`
/// 4. StringToSign = `sha1\nKeyTime\nSHA1(HttpString)\n`
/// 5. Signature = HMAC-SHA1(SignKey, StringToSign)
pub fn generate_cos_authorization(
    credentials: &CosCredentials,
    request: &SignedRequestContext<'_>,
    clock: &dyn Clock,
) -> String {
    let key_time = generate_key_time(clock.now_unix_seconds(), credentials.sign_expiration_secs);

    // SignKey 以长期密钥为 key
    let sign_key = hmac_sha1_hex(&credentials.secret_key, &key_time);

    let (url_param_list, http_parameters) =
        canonicalize(request.url_parameters).unwrap_or_default();
    let (header_list, http_headers) = canonicalize(request.headers).unwrap_or_default();

    let http_string = format!(
        "{}\n{}\n{}\n{}\n",
        request.method.to_lowercase(),
        request.uri_path_name,
        http_parameters,
        http_headers
    );

    let string_to_sign = format!("sha1\n{}\n{}\n", key_time, sha1_hex(&http_string));

    // Signature 以 SignKey 为 key
    let signature = hmac_sha1_hex(&sign_key, &string_to_sign);

    format!(
        "q-sign-algorithm=sha1&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list={}&q-url-param-list={}&q-signature={}",
        credentials.secret_id, key_time, key_time, header_list, url_param_list, signature
    )
}

/// 构建COS的认证头：在原有请求头基础上加入 `Authorization`
pub fn build_cos_auth_headers(
    credentials: &CosCredentials,
    request: &SignedRequestContext<'_>,
    clock: &dyn Clock,
) -> HashMap<String, String> {
    let authorization = generate_cos_authorization(credentials, request, clock);

    let mut headers = request.headers.clone();
    headers.insert("Authorization".to_string(), authorization);
    headers
}
