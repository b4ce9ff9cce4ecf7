use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cos_helper::{
    ByteContent, Clock, CompletionCallback, CosClient, CosConfig, CosResponse, FileInfoType,
    FileIo, HttpMethod, HttpTransport, RequestBody, StorageError, StorageRequest,
    TransportCompletion, TransportHandle, UploadSource,
};

const HOST: &str = "bucket-1250000000.cos.ap-guangzhou.myqcloud.com";

/// 记录所有派发的请求，不发起真实网络调用
#[derive(Default)]
struct RecordingTransport {
    dispatched: Mutex<Vec<(TransportHandle, StorageRequest)>>,
    fail: bool,
}

impl RecordingTransport {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn dispatched(&self) -> Vec<(TransportHandle, StorageRequest)> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl HttpTransport for RecordingTransport {
    fn dispatch(&self, request: &StorageRequest) -> Result<TransportHandle, StorageError> {
        if self.fail {
            return Err(StorageError::DispatchFailed("transport offline".to_string()));
        }
        let mut dispatched = self.dispatched.lock().unwrap();
        let handle = TransportHandle(dispatched.len() as u64 + 100);
        dispatched.push((handle, request.clone()));
        Ok(handle)
    }
}

/// 内存中的文件系统
#[derive(Default)]
struct MemoryFileIo {
    sources: HashMap<String, u64>,
    written: Mutex<HashMap<String, Vec<u8>>>,
    read_only: bool,
}

impl FileIo for MemoryFileIo {
    fn open_source(&self, path: &str) -> Result<UploadSource, StorageError> {
        let len = self
            .sources
            .get(path)
            .ok_or_else(|| StorageError::IoError(format!("No such file: {}", path)))?;
        Ok(UploadSource {
            path: PathBuf::from(path),
            len: *len,
        })
    }

    fn write_all(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::IoError("Read-only file system".to_string()));
        }
        self.written
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }
}

struct FixedClock(i64);

impl Clock for FixedClock {
    fn now_unix_seconds(&self) -> i64 {
        self.0
    }
}

type Seen = Arc<Mutex<Vec<(&'static str, CosResponse)>>>;

fn record(seen: &Seen, label: &'static str) -> CompletionCallback {
    let seen = Arc::clone(seen);
    Box::new(move |response: &CosResponse| {
        seen.lock().unwrap().push((label, response.clone()));
    })
}

fn config(use_authorization: bool) -> CosConfig {
    CosConfig {
        use_authorization,
        app_id: 1250000000,
        bucket_name: "bucket".to_string(),
        region: "ap-guangzhou".to_string(),
        secret_id: "AKIDexample".to_string(),
        secret_key: "secretkey".to_string(),
        ..Default::default()
    }
}

fn client_with(
    config: CosConfig,
    transport: Arc<RecordingTransport>,
    file_io: Arc<MemoryFileIo>,
) -> CosClient {
    CosClient::with_clock(config, transport, file_io, Arc::new(FixedClock(1_700_000_000))).unwrap()
}

fn ok_completion(handle: TransportHandle, headers: &[(&str, &str)], body: &'static [u8]) -> TransportCompletion {
    TransportCompletion {
        handle,
        connected: true,
        status: 200,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: Bytes::from_static(body),
    }
}

#[test]
fn test_concurrent_requests_share_one_call() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());
    let seen = Seen::default();

    let first = client
        .get_file_info("/v.txt", "", FileInfoType::ContentLength.into(), Some(record(&seen, "first")))
        .unwrap();
    let second = client
        .download_file("/v.txt", "", "", Some(record(&seen, "second")))
        .unwrap();

    assert_eq!(transport.dispatched().len(), 1);
    assert_eq!(first.handle(), second.handle());
    assert_eq!(second.method(), HttpMethod::Head);
    assert_eq!(client.pending_count(), 1);

    client.handle_completion(ok_completion(first.handle(), &[("Content-Length", "42")], b""));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "first");
    assert_eq!(seen[1].0, "second");
    assert_eq!(seen[0].1, seen[1].1);
    assert_eq!(seen[0].1.file_info(FileInfoType::ContentLength), Some("42"));
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_different_paths_dispatch_separately() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());

    let a = client.download_file("/a.txt", "", "", None).unwrap();
    let b = client.download_file("/b.txt", "", "", None).unwrap();

    assert_ne!(a.handle(), b.handle());
    assert_eq!(transport.dispatched().len(), 2);
    assert_eq!(client.pending_count(), 2);
}

#[test]
fn test_invalid_paths_are_rejected() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());

    assert!(client.download_file("", "", "", None).is_none());
    assert!(client
        .get_file_info("no-leading-slash", "", FileInfoType::Md5.into(), None)
        .is_none());
    assert!(transport.dispatched().is_empty());
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_probe_reports_requested_fields() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());
    let seen = Seen::default();

    let request = client
        .get_file_info(
            "/v.txt",
            "",
            FileInfoType::ContentLength | FileInfoType::Md5,
            Some(record(&seen, "probe")),
        )
        .unwrap();

    let transport_requests = transport.dispatched();
    let (_, dispatched) = &transport_requests[0];
    assert_eq!(dispatched.method, HttpMethod::Head);
    assert_eq!(dispatched.url, format!("https://{}/v.txt?", HOST));
    assert_eq!(dispatched.headers.get("Host").map(String::as_str), Some(HOST));
    assert!(!dispatched.headers.contains_key("Authorization"));

    client.handle_completion(ok_completion(
        request.handle(),
        &[
            ("Content-Length", "42"),
            ("ETag", "\"abc\""),
            ("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        ],
        b"",
    ));

    let seen = seen.lock().unwrap();
    let response = &seen[0].1;
    assert!(response.is_ok());
    assert_eq!(response.file_info(FileInfoType::ContentLength), Some("42"));
    assert_eq!(response.file_info(FileInfoType::Md5), Some("\"abc\""));
    assert_eq!(response.file_info(FileInfoType::LastModifiedUtcTimestamp), None);
}

#[test]
fn test_signed_request_carries_authorization() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(true), transport.clone(), Arc::default());

    client
        .get_file_info("/v.txt", "", FileInfoType::Md5.into(), None)
        .unwrap();

    let transport_requests = transport.dispatched();
    let (_, dispatched) = &transport_requests[0];
    assert_eq!(
        dispatched.headers["Authorization"],
        "q-sign-algorithm=sha1&q-ak=AKIDexample\
         &q-sign-time=1700000000;1700000060&q-key-time=1700000000;1700000060\
         &q-header-list=host&q-url-param-list=\
         &q-signature=75759a1b1f03a020ae6ef6522170a9b23eebf8a0"
    );
    assert_eq!(dispatched.headers.get("Host").map(String::as_str), Some(HOST));
}

#[test]
fn test_cdn_host_changes_url_but_not_signature() {
    let direct = Arc::new(RecordingTransport::default());
    client_with(config(true), direct.clone(), Arc::default())
        .download_file("/v.txt", "", "", None)
        .unwrap();

    let via_cdn = Arc::new(RecordingTransport::default());
    let client = client_with(config(true), via_cdn.clone(), Arc::default());
    client.set_cdn_host(Some("cdn.example.com".to_string()));
    let request = client.download_file("/v.txt", "", "", None).unwrap();

    let direct_requests = direct.dispatched();
    let (_, direct_request) = &direct_requests[0];
    let via_cdn_requests = via_cdn.dispatched();
    let (_, cdn_request) = &via_cdn_requests[0];

    assert_eq!(request.url(), "https://cdn.example.com/v.txt?");
    assert_eq!(cdn_request.url, "https://cdn.example.com/v.txt?");
    assert_eq!(direct_request.url, format!("https://{}/v.txt?", HOST));
    assert_eq!(
        direct_request.headers["Authorization"],
        cdn_request.headers["Authorization"]
    );
    assert_eq!(cdn_request.headers.get("Host").map(String::as_str), Some(HOST));
}

#[test]
fn test_upload_ignores_cdn_host() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());
    client.set_cdn_host(Some("cdn.example.com".to_string()));

    client
        .upload_content(Bytes::from_static(b"hello"), "/up.txt", "", None)
        .unwrap();

    let transport_requests = transport.dispatched();
    let (_, dispatched) = &transport_requests[0];
    assert_eq!(dispatched.url, format!("https://{}/up.txt?", HOST));
}

#[test]
fn test_upload_file_streams_source() {
    let transport = Arc::new(RecordingTransport::default());
    let file_io = Arc::new(MemoryFileIo {
        sources: HashMap::from([("/tmp/local.bin".to_string(), 2048)]),
        ..Default::default()
    });
    let client = client_with(config(false), transport.clone(), file_io);

    let request = client
        .upload_file("/tmp/local.bin", "/remote/local.bin", "", None)
        .unwrap();
    assert_eq!(request.method(), HttpMethod::Put);
    assert!(request.content().is_empty());

    let transport_requests = transport.dispatched();
    let (_, dispatched) = &transport_requests[0];
    match &dispatched.body {
        RequestBody::File(source) => {
            assert_eq!(source.path, PathBuf::from("/tmp/local.bin"));
            assert_eq!(source.len, 2048);
        }
        other => panic!("unexpected body: {:?}", other),
    }
}

#[test]
fn test_upload_with_missing_source_is_rejected() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());

    assert!(client
        .upload_file("/does/not/exist", "/remote.bin", "", None)
        .is_none());
    assert!(client.upload_file("", "/remote.bin", "", None).is_none());
    assert!(transport.dispatched().is_empty());
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_upload_content_exposes_content() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());

    let request = client
        .upload_content(Bytes::from_static(b"payload"), "/p.txt", "acl", None)
        .unwrap();

    assert_eq!(request.content(), b"payload");
    assert_eq!(request.uri_path_name(), "/p.txt");
    assert_eq!(request.url(), format!("https://{}/p.txt?acl", HOST));
}

#[test]
fn test_download_saves_content() {
    let transport = Arc::new(RecordingTransport::default());
    let file_io = Arc::new(MemoryFileIo::default());
    let client = client_with(config(false), transport.clone(), file_io.clone());
    let seen = Seen::default();

    let request = client
        .download_file("/v.txt", "", "saved/v.txt", Some(record(&seen, "download")))
        .unwrap();
    client.handle_completion(ok_completion(request.handle(), &[], b"file body"));

    assert_eq!(
        file_io.written.lock().unwrap().get("saved/v.txt").map(Vec::as_slice),
        Some(&b"file body"[..])
    );
    let seen = seen.lock().unwrap();
    assert!(seen[0].1.is_ok());
    assert_eq!(seen[0].1.content(), b"file body");
}

#[test]
fn test_failed_download_is_not_saved() {
    let transport = Arc::new(RecordingTransport::default());
    let file_io = Arc::new(MemoryFileIo::default());
    let client = client_with(config(false), transport.clone(), file_io.clone());

    let request = client.download_file("/v.txt", "", "saved/v.txt", None).unwrap();
    client.handle_completion(TransportCompletion {
        handle: request.handle(),
        connected: true,
        status: 404,
        body: Bytes::from_static(b"NoSuchKey"),
        ..Default::default()
    });

    assert!(file_io.written.lock().unwrap().is_empty());
}

#[test]
fn test_persistence_failure_keeps_success() {
    let transport = Arc::new(RecordingTransport::default());
    let file_io = Arc::new(MemoryFileIo {
        read_only: true,
        ..Default::default()
    });
    let client = client_with(config(false), transport.clone(), file_io);
    let seen = Seen::default();

    let request = client
        .download_file("/v.txt", "", "saved/v.txt", Some(record(&seen, "download")))
        .unwrap();
    client.handle_completion(ok_completion(request.handle(), &[], b"file body"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1.is_ok());
}

#[test]
fn test_connection_failure_reaches_waiters() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());
    let seen = Seen::default();

    let request = client
        .download_file("/v.txt", "", "", Some(record(&seen, "download")))
        .unwrap();
    client.handle_completion(TransportCompletion {
        handle: request.handle(),
        ..Default::default()
    });

    let seen = seen.lock().unwrap();
    assert!(!seen[0].1.is_ok());
    assert_eq!(seen[0].1.response_code(), -1);
}

#[test]
fn test_unknown_handle_is_dropped() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());
    let seen = Seen::default();

    client
        .download_file("/v.txt", "", "", Some(record(&seen, "download")))
        .unwrap();
    client.handle_completion(ok_completion(TransportHandle(9999), &[], b""));

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(client.pending_count(), 1);
}

#[test]
fn test_waiter_can_resubmit_same_path() {
    let transport = Arc::new(RecordingTransport::default());
    let client = Arc::new(client_with(config(false), transport.clone(), Arc::default()));
    let resubmitted = Arc::new(Mutex::new(None));

    let callback: CompletionCallback = {
        let client = Arc::clone(&client);
        let resubmitted = Arc::clone(&resubmitted);
        Box::new(move |_response: &CosResponse| {
            let request = client.download_file("/v.txt", "", "", None);
            *resubmitted.lock().unwrap() = request.map(|r| r.handle());
        })
    };

    let first = client.download_file("/v.txt", "", "", Some(callback)).unwrap();
    client.handle_completion(ok_completion(first.handle(), &[], b""));

    let second = resubmitted.lock().unwrap().expect("resubmission dispatched");
    assert_ne!(second, first.handle());
    assert_eq!(transport.dispatched().len(), 2);
    assert_eq!(client.pending_count(), 1);
}

#[test]
fn test_dispatch_failure_registers_nothing() {
    let transport = Arc::new(RecordingTransport::failing());
    let client = client_with(config(false), transport, Arc::default());

    assert!(client.download_file("/v.txt", "", "", None).is_none());
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_missing_credentials_rejected() {
    let mut config = config(true);
    config.secret_key.clear();
    let result = CosClient::new(
        config,
        Arc::new(RecordingTransport::default()),
        Arc::new(MemoryFileIo::default()),
    );
    assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_drive_delivers_completions() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());
    let seen = Seen::default();

    let request = client
        .get_file_info("/v.txt", "", FileInfoType::Md5.into(), Some(record(&seen, "probe")))
        .unwrap();

    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    sender
        .send(ok_completion(request.handle(), &[("etag", "\"d41d8\"")], b""))
        .unwrap();
    drop(sender);

    client.drive(receiver).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1.file_info(FileInfoType::Md5), Some("\"d41d8\""));
    assert_eq!(client.pending_count(), 0);
}

#[test]
fn test_joining_without_callback_keeps_other_waiters() {
    let transport = Arc::new(RecordingTransport::default());
    let client = client_with(config(false), transport.clone(), Arc::default());
    let seen = Seen::default();

    let first = client
        .download_file("/v.txt", "", "", Some(record(&seen, "first")))
        .unwrap();
    let unbound = client.download_file("/v.txt", "", "", None).unwrap();
    client
        .download_file("/v.txt", "", "", Some(record(&seen, "third")))
        .unwrap();

    assert_eq!(unbound.handle(), first.handle());
    assert_eq!(transport.dispatched().len(), 1);

    client.handle_completion(ok_completion(first.handle(), &[], b"body"));

    let seen = seen.lock().unwrap();
    let labels: Vec<_> = seen.iter().map(|(label, _)| *label).collect();
    assert_eq!(labels, ["first", "third"]);
}

/// 收集 warn 及以上级别的日志
struct CaptureLogger {
    records: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.records.lock().unwrap().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Mutex::new(Vec::new()),
};

fn captured_logs() -> &'static CaptureLogger {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(log::LevelFilter::Warn);
    });
    &LOGGER
}

#[test]
fn test_download_joining_probe_warns_and_saves_nothing() {
    let logs = captured_logs();
    let transport = Arc::new(RecordingTransport::default());
    let file_io = Arc::new(MemoryFileIo::default());
    let client = client_with(config(false), transport.clone(), file_io.clone());
    let seen = Seen::default();

    let probe = client
        .get_file_info("/joined.txt", "", FileInfoType::ContentLength.into(), None)
        .unwrap();
    let download = client
        .download_file("/joined.txt", "", "saved/joined.txt", Some(record(&seen, "download")))
        .unwrap();
    assert_eq!(download.method(), HttpMethod::Head);

    assert!(logs
        .records
        .lock()
        .unwrap()
        .iter()
        .any(|message| message.contains("/joined.txt") && message.contains("joined pending")));

    client.handle_completion(ok_completion(probe.handle(), &[("Content-Length", "3")], b""));

    assert!(file_io.written.lock().unwrap().is_empty());
    assert!(seen.lock().unwrap()[0].1.is_ok());
}

/// 写入阻塞直到测试放行
struct GatedFileIo {
    gate: Mutex<std::sync::mpsc::Receiver<()>>,
    written: Mutex<Vec<String>>,
}

impl FileIo for GatedFileIo {
    fn open_source(&self, path: &str) -> Result<UploadSource, StorageError> {
        Err(StorageError::IoError(format!("No such file: {}", path)))
    }

    fn write_all(&self, path: &str, _content: &[u8]) -> Result<(), StorageError> {
        self.gate
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| StorageError::IoError("gate closed".to_string()))?;
        self.written.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_drive_not_blocked_by_slow_save() {
    use std::time::Duration;
    use tokio::sync::oneshot;

    let (release, gate) = std::sync::mpsc::channel();
    let file_io = Arc::new(GatedFileIo {
        gate: Mutex::new(gate),
        written: Mutex::default(),
    });
    let client = Arc::new(
        CosClient::with_clock(
            config(false),
            Arc::new(RecordingTransport::default()),
            file_io.clone(),
            Arc::new(FixedClock(1_700_000_000)),
        )
        .unwrap(),
    );

    let (download_tx, mut download_rx) = oneshot::channel();
    let (probe_tx, probe_rx) = oneshot::channel();

    let download = client
        .download_file(
            "/slow.bin",
            "",
            "saved/slow.bin",
            Some(Box::new(move |response: &CosResponse| {
                let _ = download_tx.send(response.is_ok());
            })),
        )
        .unwrap();
    let probe = client
        .get_file_info(
            "/fast.txt",
            "",
            FileInfoType::ContentLength.into(),
            Some(Box::new(move |response: &CosResponse| {
                let size = response.file_info(FileInfoType::ContentLength).map(str::to_string);
                let _ = probe_tx.send(size);
            })),
        )
        .unwrap();

    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let driver = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.drive(receiver).await })
    };

    sender
        .send(ok_completion(download.handle(), &[], b"slow body"))
        .unwrap();
    sender
        .send(ok_completion(probe.handle(), &[("Content-Length", "7")], b""))
        .unwrap();

    let size = tokio::time::timeout(Duration::from_secs(5), probe_rx)
        .await
        .expect("second completion delivered while the save is pending")
        .unwrap();
    assert_eq!(size.as_deref(), Some("7"));
    assert!(download_rx.try_recv().is_err());

    release.send(()).unwrap();
    let succeeded = tokio::time::timeout(Duration::from_secs(5), download_rx)
        .await
        .expect("download waiter notified after the save")
        .unwrap();
    assert!(succeeded);
    assert_eq!(*file_io.written.lock().unwrap(), ["saved/slow.bin"]);

    drop(sender);
    driver.await.unwrap();
}

#[tokio::test]
async fn test_failed_save_inside_runtime_keeps_success() {
    use std::time::Duration;
    use tokio::sync::oneshot;

    let file_io = Arc::new(MemoryFileIo {
        read_only: true,
        ..Default::default()
    });
    let client = client_with(config(false), Arc::new(RecordingTransport::default()), file_io);

    let (tx, rx) = oneshot::channel();
    let request = client
        .download_file(
            "/v.txt",
            "",
            "saved/v.txt",
            Some(Box::new(move |response: &CosResponse| {
                let _ = tx.send(response.is_ok());
            })),
        )
        .unwrap();
    client.handle_completion(ok_completion(request.handle(), &[], b"file body"));

    let succeeded = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(succeeded);
}
