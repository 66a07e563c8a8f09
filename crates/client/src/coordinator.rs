//! Per-session transfer loop.
//!
//! A [`Coordinator`] drives one [`UploadSession`] from `Uploading` until it
//! completes, fails, or is interrupted through its control channel. Recoverable
//! failures (offset conflicts, checksum rejections, transient network errors)
//! are handled here and never leave the loop unless the retry budget runs out.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chunkline_protocol::Event;
use chunkline_transfer::{Chunk, ChunkReader, RetryPolicy, TransferError, UploadSession};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::transport::{Created, UploadState, UploadTransport};

/// Requested run state for a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Run,
    Pause,
    Cancel,
}

pub(crate) struct Coordinator {
    transport: Arc<dyn UploadTransport>,
    retry: RetryPolicy,
    events: mpsc::Sender<Event>,
}

impl Coordinator {
    pub(crate) fn new(
        transport: Arc<dyn UploadTransport>,
        retry: RetryPolicy,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            transport,
            retry,
            events,
        }
    }

    /// Runs `session`, which must already be `Uploading`, and hands it back in
    /// its new state: completed, paused, cancelled, or error.
    ///
    /// An interruption drops the in-flight request; the offset only ever moves
    /// on an acknowledged append or a server query, so nothing is lost.
    pub(crate) async fn run(
        &self,
        mut session: UploadSession,
        mut control: watch::Receiver<Control>,
    ) -> UploadSession {
        let outcome = tokio::select! {
            result = self.transfer(&mut session) => Ok(result),
            signal = interrupted(&mut control) => Err(signal),
        };

        let id = session.id().to_string();
        let transition = match outcome {
            Ok(Ok(location)) => {
                info!(
                    session = %id,
                    total_bytes = session.total_bytes(),
                    location = %location,
                    "upload completed"
                );
                session.complete(location)
            }
            Ok(Err(e)) => {
                error!(
                    session = %id,
                    offset = session.uploaded_offset(),
                    error = %e,
                    "upload failed"
                );
                session.fail(e.to_string())
            }
            Err(Control::Cancel) => {
                self.terminate(&mut session).await;
                return session;
            }
            Err(_) => {
                info!(session = %id, offset = session.uploaded_offset(), "upload paused");
                session.pause()
            }
        };
        if let Err(e) = transition {
            warn!(session = %id, error = %e, "unexpected session transition");
        }
        session
    }

    /// Deletes the upload on the server (best effort) and cancels the session.
    pub(crate) async fn terminate(&self, session: &mut UploadSession) {
        if let Some(url) = session.upload_url() {
            match self.transport.terminate(url).await {
                Ok(()) | Err(ClientError::NotFound) => {
                    debug!(session = %session.id(), "server upload terminated");
                }
                Err(e) => {
                    warn!(session = %session.id(), error = %e, "failed to terminate server upload");
                }
            }
        }
        if let Err(e) = session.cancel() {
            warn!(session = %session.id(), error = %e, "unexpected session transition");
        }
        info!(session = %session.id(), "upload cancelled");
    }

    /// Sends every remaining byte and returns the retrieval location.
    async fn transfer(&self, session: &mut UploadSession) -> Result<String, ClientError> {
        let mut reader = open_reader(session.path().to_path_buf(), session.chunk_size()).await?;
        if reader.file_size() != session.total_bytes() {
            return Err(ClientError::SourceChanged {
                expected: session.total_bytes(),
                actual: reader.file_size(),
            });
        }

        // An existing upload is always resynced before any byte is sent.
        let (upload_url, mut location) = match session.upload_url().map(str::to_owned) {
            Some(url) => {
                let state = self.resync(session, &url).await?;
                (url, state.location)
            }
            None => {
                let created = self.create(session).await?;
                session.set_upload_url(created.upload_url.clone());
                (created.upload_url, created.location)
            }
        };

        loop {
            let offset = session.uploaded_offset();
            if offset == session.total_bytes() {
                if let Some(location) = location {
                    return Ok(location);
                }
                // Every byte is acknowledged but the finalizing response was
                // never seen; the server decides.
                let state = self.resync(session, &upload_url).await?;
                match state.location {
                    Some(found) => return Ok(found),
                    None if state.offset == session.total_bytes() => {
                        return Err(ClientError::Protocol(
                            "server holds every byte but did not finalize".into(),
                        ));
                    }
                    None => continue,
                }
            }

            let (next, chunk) = read_chunk(reader, offset).await?;
            reader = next;
            let Some(chunk) = chunk else {
                return Err(ClientError::SourceChanged {
                    expected: session.total_bytes(),
                    actual: offset,
                });
            };
            let len = chunk.data.len() as u64;

            let result = self
                .transport
                .append(&upload_url, offset, Bytes::from(chunk.data), chunk.checksum)
                .await;
            match result {
                Ok(appended) => {
                    if appended.offset == offset + len {
                        session.record_chunk(len)?;
                    } else {
                        warn!(
                            session = %session.id(),
                            expected = offset + len,
                            server = appended.offset,
                            "server reported unexpected offset"
                        );
                        session.adopt_offset(appended.offset)?;
                    }
                    if appended.location.is_some() {
                        location = appended.location;
                    }
                    self.emit_progress(session).await;
                }
                Err(ClientError::Conflict { offset: server }) => {
                    warn!(
                        session = %session.id(),
                        local = offset,
                        server,
                        "offset conflict, adopting server offset"
                    );
                    session.adopt_offset(server)?;
                    self.emit_progress(session).await;
                }
                Err(ClientError::Checksum) => {
                    // Resend the same chunk.
                    self.back_off(session, ClientError::Checksum).await?;
                }
                Err(e) if e.is_transient() => {
                    self.back_off(session, e).await?;
                    let state = self.resync(session, &upload_url).await?;
                    if state.location.is_some() {
                        location = state.location;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn create(&self, session: &mut UploadSession) -> Result<Created, ClientError> {
        loop {
            let result = self
                .transport
                .create(session.endpoint(), session.total_bytes(), session.metadata())
                .await;
            match result {
                Ok(created) => {
                    info!(
                        session = %session.id(),
                        upload_url = %created.upload_url,
                        total_bytes = session.total_bytes(),
                        "upload created"
                    );
                    return Ok(created);
                }
                Err(e) if e.is_transient() => self.back_off(session, e).await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Queries the authoritative offset and adopts it.
    async fn resync(
        &self,
        session: &mut UploadSession,
        upload_url: &str,
    ) -> Result<UploadState, ClientError> {
        let state = loop {
            let result = self.transport.query_offset(upload_url).await;
            match result {
                Ok(state) => break state,
                Err(e) if e.is_transient() => self.back_off(session, e).await?,
                Err(e) => return Err(e),
            }
        };

        if state.length != Some(session.total_bytes()) {
            return Err(ClientError::Protocol(format!(
                "server upload length {:?} does not match file size {}",
                state.length,
                session.total_bytes()
            )));
        }
        if state.offset != session.uploaded_offset() {
            debug!(
                session = %session.id(),
                local = session.uploaded_offset(),
                server = state.offset,
                "resynced offset"
            );
            session.adopt_offset(state.offset)?;
            self.emit_progress(session).await;
        }
        Ok(state)
    }

    /// Sleeps before the next attempt, or returns `error` once the budget is spent.
    async fn back_off(
        &self,
        session: &mut UploadSession,
        error: ClientError,
    ) -> Result<(), ClientError> {
        let attempt = session.note_retry();
        let Some(delay) = self.retry.delay_for_attempt(attempt) else {
            warn!(session = %session.id(), attempts = attempt - 1, error = %error, "retries exhausted");
            return Err(error);
        };
        warn!(
            session = %session.id(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn emit_progress(&self, session: &UploadSession) {
        let _ = self
            .events
            .send(Event::Progress {
                session_id: session.id().to_string(),
                payload: session.progress(),
            })
            .await;
    }
}

/// Resolves once a pause or cancel is requested.
async fn interrupted(control: &mut watch::Receiver<Control>) -> Control {
    loop {
        let current = *control.borrow_and_update();
        if current != Control::Run {
            return current;
        }
        if control.changed().await.is_err() {
            // Nobody can interrupt us any more.
            return std::future::pending().await;
        }
    }
}

async fn open_reader(path: PathBuf, chunk_size: usize) -> Result<ChunkReader, ClientError> {
    let reader = tokio::task::spawn_blocking(move || ChunkReader::new(&path, chunk_size))
        .await
        .map_err(join_error)??;
    Ok(reader)
}

/// Reads the chunk at `offset`, moving the reader through `spawn_blocking`.
async fn read_chunk(
    mut reader: ChunkReader,
    offset: u64,
) -> Result<(ChunkReader, Option<Chunk>), ClientError> {
    let (reader, chunk) = tokio::task::spawn_blocking(move || -> Result<_, TransferError> {
        reader.seek_to(offset)?;
        let chunk = reader.next_chunk()?;
        Ok((reader, chunk))
    })
    .await
    .map_err(join_error)??;
    Ok((reader, chunk))
}

fn join_error(e: tokio::task::JoinError) -> ClientError {
    ClientError::Io(std::io::Error::other(format!("task join error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DOWNLOAD_URL, Fault, MockTransport, UPLOAD_URL};
    use chunkline_protocol::{Metadata, SessionStatus};
    use std::path::Path;
    use std::time::Duration;

    const ENDPOINT: &str = "http://mock/api/uploads";

    fn source(dir: &tempfile::TempDir, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn session(path: &Path, total: u64, chunk_size: usize) -> UploadSession {
        let mut session =
            UploadSession::new("s1", path, ENDPOINT, total, chunk_size, Metadata::new());
        session.start().unwrap();
        session
    }

    async fn drive(
        transport: &Arc<MockTransport>,
        session: UploadSession,
        delays_ms: &[u64],
    ) -> (UploadSession, Vec<Event>) {
        let (tx, mut rx) = mpsc::channel(256);
        let retry = RetryPolicy::from_schedule(
            delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        );
        let coordinator = Coordinator::new(transport.clone(), retry, tx);
        let (_control, control_rx) = watch::channel(Control::Run);
        let session = coordinator.run(session, control_rx).await;
        drop(coordinator);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (session, events)
    }

    fn progress_offsets(events: &[Event]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Progress { payload, .. } => Some(payload.uploaded_bytes),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn uploads_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = source(&dir, 10);
        let transport = Arc::new(MockTransport::new());

        let (session, events) = drive(&transport, session(&path, 10, 4), &[0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.location(), Some(DOWNLOAD_URL));
        assert_eq!(session.upload_url(), Some(UPLOAD_URL));
        assert_eq!(progress_offsets(&events), vec![4, 8, 10]);
        assert_eq!(transport.attempts(), vec![0, 4, 8]);
        assert_eq!(transport.stored(), data);
        assert_eq!(transport.queries(), 0);
    }

    #[tokio::test]
    async fn conflict_adopts_server_offset() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = source(&dir, 10);
        // The server already holds the first 4 bytes the client never saw acknowledged.
        let transport = Arc::new(MockTransport::new().with_stored(data[..4].to_vec()));

        let (session, events) = drive(&transport, session(&path, 10, 4), &[0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(transport.attempts(), vec![0, 4, 8]);
        assert_eq!(progress_offsets(&events), vec![4, 8, 10]);
        assert_eq!(transport.stored(), data);
    }

    #[tokio::test]
    async fn transient_failure_resyncs_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = source(&dir, 12);
        let transport = Arc::new(MockTransport::new());
        transport.push_fault(Fault::Skip);
        transport.push_fault(Fault::Before(ClientError::Transient("reset".into())));

        let (session, _) = drive(&transport, session(&path, 12, 4), &[0, 0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.retry_count(), 0);
        assert_eq!(transport.queries(), 1);
        assert_eq!(transport.attempts(), vec![0, 4, 4, 8]);
        assert_eq!(transport.stored(), data);
    }

    #[tokio::test]
    async fn lost_acknowledgement_is_not_resent() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = source(&dir, 10);
        let transport = Arc::new(MockTransport::new());
        transport.push_fault(Fault::Skip);
        // Chunk two reaches the server but the response is lost.
        transport.push_fault(Fault::AfterStore(ClientError::Transient("timeout".into())));

        let (session, events) = drive(&transport, session(&path, 10, 4), &[0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(transport.attempts(), vec![0, 4, 8]);
        assert_eq!(progress_offsets(&events), vec![4, 8, 10]);
        assert_eq!(transport.stored(), data);
    }

    #[tokio::test]
    async fn lost_final_acknowledgement_completes_from_query() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = source(&dir, 8);
        let transport = Arc::new(MockTransport::new());
        transport.push_fault(Fault::Skip);
        transport.push_fault(Fault::AfterStore(ClientError::Transient("timeout".into())));

        let (session, _) = drive(&transport, session(&path, 8, 4), &[0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.location(), Some(DOWNLOAD_URL));
        assert_eq!(transport.attempts(), vec![0, 4]);
        assert_eq!(transport.stored(), data);
    }

    #[tokio::test]
    async fn checksum_rejection_resends_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = source(&dir, 8);
        let transport = Arc::new(MockTransport::new());
        transport.push_fault(Fault::Before(ClientError::Checksum));

        let (session, _) = drive(&transport, session(&path, 8, 4), &[0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(transport.attempts(), vec![0, 0, 4]);
        assert_eq!(transport.queries(), 0);
        assert_eq!(transport.stored(), data);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_session() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = source(&dir, 8);
        let transport = Arc::new(MockTransport::new());
        for _ in 0..3 {
            transport.push_fault(Fault::Before(ClientError::Transient("down".into())));
        }

        let (session, events) = drive(&transport, session(&path, 8, 4), &[0, 0]).await;

        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.last_error().unwrap().contains("down"));
        assert_eq!(session.uploaded_offset(), 0);
        assert!(progress_offsets(&events).is_empty());
    }

    #[tokio::test]
    async fn fatal_rejection_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = source(&dir, 8);
        let transport = Arc::new(MockTransport::new());
        transport.push_fault(Fault::Before(ClientError::Rejected {
            status: 413,
            message: "too large".into(),
        }));

        let (session, _) = drive(&transport, session(&path, 8, 4), &[0, 0, 0]).await;

        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(transport.attempts(), vec![0]);
    }

    #[tokio::test]
    async fn resume_queries_offset_first() {
        let dir = tempfile::tempdir().unwrap();
        let (path, data) = source(&dir, 10);
        let transport = Arc::new(MockTransport::existing(10, data[..6].to_vec()));

        let mut resumed = session(&path, 10, 4);
        resumed.set_upload_url(UPLOAD_URL);
        let (session, events) = drive(&transport, resumed, &[0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(transport.queries(), 1);
        assert_eq!(transport.attempts(), vec![6]);
        assert_eq!(progress_offsets(&events), vec![6, 10]);
        assert_eq!(transport.stored(), data);
    }

    #[tokio::test]
    async fn resume_of_vanished_upload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = source(&dir, 10);
        let transport = Arc::new(MockTransport::new());

        let mut resumed = session(&path, 10, 4);
        resumed.set_upload_url(UPLOAD_URL);
        let (session, _) = drive(&transport, resumed, &[0]).await;

        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(session.last_error(), Some("upload not found on server"));
        assert!(transport.attempts().is_empty());
    }

    #[tokio::test]
    async fn empty_file_finalizes_at_create() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = source(&dir, 0);
        let transport = Arc::new(MockTransport::new());

        let (session, events) = drive(&transport, session(&path, 0, 4), &[0]).await;

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.location(), Some(DOWNLOAD_URL));
        assert!(transport.attempts().is_empty());
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn changed_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = source(&dir, 6);
        let transport = Arc::new(MockTransport::new());

        let (session, _) = drive(&transport, session(&path, 10, 4), &[0]).await;

        assert_eq!(session.status(), SessionStatus::Error);
        assert!(session.last_error().unwrap().contains("expected 10"));
    }

    #[tokio::test]
    async fn cancel_terminates_server_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = source(&dir, 12);
        let transport = Arc::new(MockTransport::new().gated(1));

        let (tx, mut rx) = mpsc::channel(16);
        let coordinator = Coordinator::new(transport.clone(), RetryPolicy::default(), tx);
        let (control, control_rx) = watch::channel(Control::Run);

        let run = coordinator.run(session(&path, 12, 4), control_rx);
        let cancel = async {
            // First chunk goes through, the second blocks on the gate.
            assert!(matches!(rx.recv().await, Some(Event::Progress { .. })));
            control.send(Control::Cancel).unwrap();
        };
        let (session, ()) = tokio::join!(run, cancel);

        assert_eq!(session.status(), SessionStatus::Cancelled);
        assert_eq!(session.uploaded_offset(), 4);
        assert!(transport.terminated());
        assert_eq!(transport.attempts(), vec![0]);
    }

    #[tokio::test]
    async fn pause_keeps_offset() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = source(&dir, 12);
        let transport = Arc::new(MockTransport::new().gated(2));

        let (tx, mut rx) = mpsc::channel(16);
        let coordinator = Coordinator::new(transport.clone(), RetryPolicy::default(), tx);
        let (control, control_rx) = watch::channel(Control::Run);

        let run = coordinator.run(session(&path, 12, 4), control_rx);
        let pause = async {
            assert!(matches!(rx.recv().await, Some(Event::Progress { .. })));
            assert!(matches!(rx.recv().await, Some(Event::Progress { .. })));
            control.send(Control::Pause).unwrap();
        };
        let (session, ()) = tokio::join!(run, pause);

        assert_eq!(session.status(), SessionStatus::Paused);
        assert_eq!(session.uploaded_offset(), 8);
        assert!(!transport.terminated());
    }
}
