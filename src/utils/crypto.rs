use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// SHA1 哈希函数（返回小写十六进制）
pub fn sha1_hex(data: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// HMAC-SHA1 计算函数（返回小写十六进制）
/// 用于腾讯云COS的 SignKey 与 Signature 计算
pub fn hmac_sha1_hex(key: &str, data: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
