pub mod cos;
pub mod cos_client;
pub mod http_client;
pub mod local_client;
pub mod traits;

pub use cos::{CosEndpoint, CosRequest, CosResponse};
pub use cos_client::CosClient;
pub use http_client::{HttpTransportConfig, ReqwestTransport};
pub use local_client::LocalFileIo;
pub use traits::{
    ByteContent, Clock, CompletionCallback, CompletionReceiver, CompletionSender, CosConfig,
    FileInfoMask, FileInfoType, FileIo, HttpMethod, HttpTransport, RequestBody, StorageError,
    StorageRequest, SystemClock, TransportCompletion, TransportHandle, UploadSource,
};
