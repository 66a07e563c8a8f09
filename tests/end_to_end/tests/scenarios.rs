//! Upload scenarios against a live server.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chunkline_client::{ClientConfig, ClientError, UploadTransport, UploadWorker, WorkerHandle};
use chunkline_protocol::{Command, Event, Metadata, StartPayload};
use chunkline_transfer::sha256_digest;
use end_to_end::{ScriptedTransport, TestServer, download, http_transport, pattern, write_source};
use tokio::sync::mpsc;

const TOTAL: u64 = 10_000_000;
const CHUNK: u64 = 2_000_000;

fn client_config(server: &TestServer) -> ClientConfig {
    ClientConfig {
        endpoint: server.endpoint(),
        chunk_size: CHUNK as usize,
        retry_delays_ms: vec![0, 50, 100],
        ..ClientConfig::default()
    }
}

fn spawn_worker(
    transport: &Arc<ScriptedTransport>,
    config: ClientConfig,
) -> (WorkerHandle, mpsc::Receiver<Event>) {
    let mut handle = UploadWorker::new(transport.clone(), config).start();
    let events = handle.take_events().unwrap();
    (handle, events)
}

fn start(path: std::path::PathBuf, upload_url: Option<String>) -> Command {
    Command::Start {
        session_id: "e2e".into(),
        payload: StartPayload {
            path,
            endpoint: None,
            upload_url,
            metadata: Metadata::new(),
        },
    }
}

fn command(kind: &str) -> Command {
    let session_id = "e2e".to_string();
    match kind {
        "pause" => Command::Pause { session_id },
        "resume" => Command::Resume { session_id },
        "cancel" => Command::Cancel { session_id },
        other => panic!("unknown command {other}"),
    }
}

async fn next_event(events: &mut mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_status(events: &mut mpsc::Receiver<Event>) -> Event {
    loop {
        match next_event(events).await {
            Event::Progress { .. } => continue,
            other => return other,
        }
    }
}

async fn expect_complete(events: &mut mpsc::Receiver<Event>) -> String {
    match next_status(events).await {
        Event::Complete { payload, .. } => {
            assert_eq!(payload.total_bytes, TOTAL);
            payload.location
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

fn upload_id(upload_url: &str) -> &str {
    upload_url.rsplit('/').next().unwrap()
}

#[tokio::test]
async fn scenario_a_sequential_chunks_finalize_and_download() {
    let server = TestServer::start().await;
    let transport = http_transport();
    let data = pattern(TOTAL as usize);
    let metadata = Metadata::from([("filename".to_string(), "a.bin".to_string())]);

    let created = transport
        .create(&server.endpoint(), TOTAL, &metadata)
        .await
        .unwrap();
    assert!(created.location.is_none());
    assert!(created.upload_url.starts_with(&server.endpoint()));
    let url = created.upload_url;

    let mut location = None;
    for (i, chunk) in data.chunks(CHUNK as usize).enumerate() {
        let offset = i as u64 * CHUNK;
        let appended = transport
            .append(&url, offset, Bytes::copy_from_slice(chunk), sha256_digest(chunk))
            .await
            .unwrap();
        assert_eq!(appended.offset, offset + CHUNK);
        if appended.offset < TOTAL {
            assert!(appended.location.is_none());
        } else {
            location = appended.location;
        }
    }
    let location = location.expect("final append carries the retrieval location");
    assert_eq!(
        location,
        server.url(&format!("/api/download/{}", upload_id(&url)))
    );

    let first = transport.query_offset(&url).await.unwrap();
    let second = transport.query_offset(&url).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.offset, TOTAL);
    assert_eq!(first.length, Some(TOTAL));
    assert_eq!(first.location.as_deref(), Some(location.as_str()));

    let (status, body) = download(&location).await;
    assert_eq!(status, 200);
    assert_eq!(body.len(), TOTAL as usize);
    assert!(body == data);
}

#[tokio::test]
async fn scenario_b_lost_acknowledgement_resumes_from_server_offset() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_source(dir.path(), "b.bin", TOTAL as usize);
    // Chunk 4 reaches the server but the client never sees the response.
    let transport = Arc::new(ScriptedTransport::new(http_transport()).drop_ack_at(3 * CHUNK));
    let (handle, mut events) = spawn_worker(&transport, client_config(&server));

    handle.send(start(path, None)).await.unwrap();
    let location = expect_complete(&mut events).await;

    // Nothing resent, nothing skipped.
    assert_eq!(
        transport.appends(),
        vec![0, CHUNK, 2 * CHUNK, 3 * CHUNK, 4 * CHUNK]
    );
    assert_eq!(transport.queries(), 1);
    let (status, body) = download(&location).await;
    assert_eq!(status, 200);
    assert!(body == data);
    handle.stop().await;
}

#[tokio::test]
async fn scenario_c_conflict_reports_authoritative_offset() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_source(dir.path(), "c.bin", TOTAL as usize);
    let http = http_transport();

    let created = http
        .create(&server.endpoint(), TOTAL, &Metadata::new())
        .await
        .unwrap();
    let url = created.upload_url;
    for i in 0..3u64 {
        let chunk = &data[(i * CHUNK) as usize..((i + 1) * CHUNK) as usize];
        http.append(&url, i * CHUNK, Bytes::copy_from_slice(chunk), sha256_digest(chunk))
            .await
            .unwrap();
    }

    let stale = &data[(2 * CHUNK) as usize..(3 * CHUNK) as usize];
    let err = http
        .append(&url, 2 * CHUNK, Bytes::copy_from_slice(stale), sha256_digest(stale))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Conflict { offset } if offset == 3 * CHUNK));

    // A client holding a stale offset converges on the server's value.
    let transport = Arc::new(ScriptedTransport::new(http_transport()).stale_query(2 * CHUNK));
    let (handle, mut events) = spawn_worker(&transport, client_config(&server));
    handle.send(start(path, Some(url.clone()))).await.unwrap();
    let location = expect_complete(&mut events).await;

    assert_eq!(transport.appends(), vec![2 * CHUNK, 3 * CHUNK, 4 * CHUNK]);
    let (_, body) = download(&location).await;
    assert!(body == data);
    handle.stop().await;
}

#[tokio::test]
async fn scenario_d_pause_and_resume_without_reupload() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_source(dir.path(), "d.bin", TOTAL as usize);
    let transport = Arc::new(ScriptedTransport::new(http_transport()).gated(2));
    let (handle, mut events) = spawn_worker(&transport, client_config(&server));

    handle.send(start(path, None)).await.unwrap();
    assert!(matches!(next_event(&mut events).await, Event::Progress { .. }));
    assert!(matches!(next_event(&mut events).await, Event::Progress { .. }));

    handle.send(command("pause")).await.unwrap();
    let upload_url = match next_status(&mut events).await {
        Event::Paused { payload, .. } => {
            assert_eq!(payload.uploaded_bytes, 2 * CHUNK);
            payload.upload_url.expect("paused session has an upload URL")
        }
        other => panic!("expected pause, got {other:?}"),
    };
    let state = http_transport().query_offset(&upload_url).await.unwrap();
    assert_eq!(state.offset, 2 * CHUNK);

    transport.release();
    handle.send(command("resume")).await.unwrap();
    match next_event(&mut events).await {
        Event::Resumed { payload, .. } => assert_eq!(payload.uploaded_bytes, 2 * CHUNK),
        other => panic!("expected resume, got {other:?}"),
    }
    let location = expect_complete(&mut events).await;

    assert_eq!(transport.queries(), 1);
    assert_eq!(
        transport.appends(),
        vec![0, CHUNK, 2 * CHUNK, 3 * CHUNK, 4 * CHUNK]
    );
    let (_, body) = download(&location).await;
    assert!(body == data);
    handle.stop().await;
}

#[tokio::test]
async fn scenario_e_cancel_deletes_server_record() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_source(dir.path(), "e.bin", TOTAL as usize);
    let transport = Arc::new(ScriptedTransport::new(http_transport()).gated(1));
    let (handle, mut events) = spawn_worker(&transport, client_config(&server));

    handle.send(start(path, None)).await.unwrap();
    assert!(matches!(next_event(&mut events).await, Event::Progress { .. }));

    handle.send(command("cancel")).await.unwrap();
    let upload_url = match next_status(&mut events).await {
        Event::Cancelled { payload, .. } => payload.upload_url.expect("upload URL"),
        other => panic!("expected cancel, got {other:?}"),
    };

    let err = http_transport().query_offset(&upload_url).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound));
    assert!(!server.data_dir().join(upload_id(&upload_url)).exists());

    let listed = http_transport()
        .list_uploads(&server.url("/api/uploads-info"))
        .await
        .unwrap();
    assert!(listed.is_empty());
    handle.stop().await;
}

#[tokio::test]
async fn partial_upload_survives_server_restart() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (path, data) = write_source(dir.path(), "restart.bin", TOTAL as usize);

    let http = http_transport();
    let created = http
        .create(&server.endpoint(), TOTAL, &Metadata::new())
        .await
        .unwrap();
    let chunk = &data[..CHUNK as usize];
    http.append(&created.upload_url, 0, Bytes::copy_from_slice(chunk), sha256_digest(chunk))
        .await
        .unwrap();
    drop(http);
    let id = upload_id(&created.upload_url).to_string();

    let server = TestServer::start_in(server.stop().await).await;
    let upload_url = server.url(&format!("/api/uploads/{id}"));

    let transport = Arc::new(ScriptedTransport::new(http_transport()));
    let (handle, mut events) = spawn_worker(&transport, client_config(&server));
    handle.send(start(path, Some(upload_url))).await.unwrap();
    let location = expect_complete(&mut events).await;

    assert_eq!(transport.appends(), vec![CHUNK, 2 * CHUNK, 3 * CHUNK, 4 * CHUNK]);
    let (_, body) = download(&location).await;
    assert!(body == data);

    let listed = http_transport()
        .list_uploads(&server.url("/api/uploads-info"))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].complete);
    assert_eq!(listed[0].filename, None);
    handle.stop().await;
}

#[tokio::test]
async fn empty_file_completes_at_create() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (path, _) = write_source(dir.path(), "empty.txt", 0);
    let transport = Arc::new(ScriptedTransport::new(http_transport()));
    let (handle, mut events) = spawn_worker(&transport, client_config(&server));

    handle.send(start(path, None)).await.unwrap();
    let location = match next_status(&mut events).await {
        Event::Complete { payload, .. } => payload.location,
        other => panic!("expected completion, got {other:?}"),
    };
    assert!(transport.appends().is_empty());

    let (status, body) = download(&location).await;
    assert_eq!(status, 200);
    assert!(body.is_empty());

    let listed = http_transport()
        .list_uploads(&server.url("/api/uploads-info"))
        .await
        .unwrap();
    assert_eq!(listed[0].filename.as_deref(), Some("empty.txt"));
    handle.stop().await;
}
