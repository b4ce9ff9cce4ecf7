pub mod cos_signer;

// 重新导出主要的签名函数，方便使用
pub use cos_signer::{
    build_cos_auth_headers, canonicalize, generate_cos_authorization, CosCredentials,
    SignedRequestContext,
};
