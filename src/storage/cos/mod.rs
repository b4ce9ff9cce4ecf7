pub mod auth;
pub mod host;
pub mod parser;
pub mod response;

// 重新导出认证相关功能
pub use auth::{
    build_cos_auth_headers, canonicalize, generate_cos_authorization, CosCredentials,
    SignedRequestContext,
};

pub use host::CosEndpoint;

// 重新导出解析相关功能
pub use parser::{build_object_url, encode_path_name, parse_url_parameters, replace_with_cdn_host};

pub use response::{parse_http_date, CosRequest, CosResponse};
