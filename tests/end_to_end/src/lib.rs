//! Harness for end-to-end upload scenarios: a live server on an ephemeral
//! port and transport wrappers that inject the failures real networks produce.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chunkline_client::{
    Appended, ClientError, Created, HttpTransport, TransportFuture, UploadState, UploadTransport,
};
use chunkline_protocol::Metadata;
use chunkline_server::{LoggingHook, ServerConfig, ServerError, UploadServer};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running upload server backed by a scratch directory.
pub struct TestServer {
    pub addr: SocketAddr,
    dir: TempDir,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_in(TempDir::new().expect("temp dir")).await
    }

    /// Starts a server over an existing upload directory.
    pub async fn start_in(dir: TempDir) -> Self {
        let config = ServerConfig {
            bind: "127.0.0.1:0".parse().expect("bind address"),
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let server = UploadServer::bind(config, Arc::new(LoggingHook))
            .await
            .expect("bind server");
        let addr = server.local_addr().expect("local addr");
        let shutdown = server.shutdown_token();
        let task = tokio::spawn(server.run());
        Self {
            addr,
            dir,
            shutdown,
            task,
        }
    }

    pub fn endpoint(&self) -> String {
        self.url("/api/uploads")
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Stops the server and hands back its directory for a restart.
    pub async fn stop(self) -> TempDir {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server shutdown timed out")
            .expect("server task panicked")
            .expect("server error");
        self.dir
    }
}

pub fn http_transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(30)).expect("http client")
}

/// Deterministic content that differs between neighbouring chunks.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i / 7) as u8).wrapping_mul(31).wrapping_add(i as u8))
        .collect()
}

pub fn write_source(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let data = pattern(len);
    let path = dir.join(name);
    std::fs::write(&path, &data).expect("write source file");
    (path, data)
}

/// Fetches a retrieval URL and returns status and body.
pub async fn download(url: &str) -> (u16, Vec<u8>) {
    let response = reqwest::get(url).await.expect("download request");
    let status = response.status().as_u16();
    let body = response.bytes().await.expect("download body").to_vec();
    (status, body)
}

#[derive(Default)]
struct Record {
    appends: Vec<u64>,
    queries: usize,
    drop_ack_at: HashSet<u64>,
    stale_query: Option<u64>,
}

/// Wraps a real transport, recording traffic and injecting failures.
pub struct ScriptedTransport {
    inner: HttpTransport,
    record: Mutex<Record>,
    gate: Option<Semaphore>,
}

impl ScriptedTransport {
    pub fn new(inner: HttpTransport) -> Self {
        Self {
            inner,
            record: Mutex::new(Record::default()),
            gate: None,
        }
    }

    /// Delivers the append at `offset` but reports a dropped connection.
    pub fn drop_ack_at(self, offset: u64) -> Self {
        self.record.lock().unwrap().drop_ack_at.insert(offset);
        self
    }

    /// Answers the next query-offset with `offset` instead of the server's value.
    pub fn stale_query(self, offset: u64) -> Self {
        self.record.lock().unwrap().stale_query = Some(offset);
        self
    }

    /// Lets `permits` appends through, holding the rest until [`Self::release`].
    pub fn gated(mut self, permits: usize) -> Self {
        self.gate = Some(Semaphore::new(permits));
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    /// Offsets of every append handed to the server, in order.
    pub fn appends(&self) -> Vec<u64> {
        self.record.lock().unwrap().appends.clone()
    }

    pub fn queries(&self) -> usize {
        self.record.lock().unwrap().queries
    }
}

impl UploadTransport for ScriptedTransport {
    fn create<'a>(
        &'a self,
        endpoint: &'a str,
        length: u64,
        metadata: &'a Metadata,
    ) -> TransportFuture<'a, Created> {
        self.inner.create(endpoint, length, metadata)
    }

    fn append<'a>(
        &'a self,
        upload_url: &'a str,
        offset: u64,
        data: Bytes,
        checksum: [u8; 32],
    ) -> TransportFuture<'a, Appended> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            let drop_ack = {
                let mut record = self.record.lock().unwrap();
                record.appends.push(offset);
                record.drop_ack_at.remove(&offset)
            };
            let result = self.inner.append(upload_url, offset, data, checksum).await;
            if drop_ack && result.is_ok() {
                return Err(ClientError::Transient("connection reset".into()));
            }
            result
        })
    }

    fn query_offset<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, UploadState> {
        Box::pin(async move {
            let stale = {
                let mut record = self.record.lock().unwrap();
                record.queries += 1;
                record.stale_query.take()
            };
            let mut state = self.inner.query_offset(upload_url).await?;
            if let Some(offset) = stale {
                state.offset = offset;
                state.location = None;
            }
            Ok(state)
        })
    }

    fn terminate<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, ()> {
        self.inner.terminate(upload_url)
    }
}
