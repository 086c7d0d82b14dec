use std::sync::Arc;

use bytes::Bytes;
use gitbruv_core::Oid;
use gitbruv_storage::{GitRepository, ObjectDatabase};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::{FrontendError, Result};
use crate::pack::write_pack;
use crate::protocol::{
    negotiate, Band, NegotiationRequest, PktLineWriter, SidebandMode, FLUSH_PKT,
};
use crate::telemetry;

const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Fetch side of the smart-HTTP protocol for one repository.
pub struct GitUploadPack {
    repo: Arc<GitRepository>,
    batch_size: usize,
}

/// Outcome of one stateless negotiation round, ready to be streamed.
#[derive(Debug)]
pub struct UploadPackResponse {
    /// ACK/NAK lines; empty when the client wanted nothing.
    pub preamble: Bytes,
    /// Objects to pack, present once the client sent `done`.
    pub objects: Option<Vec<Oid>>,
    pub sideband: SidebandMode,
}

impl GitUploadPack {
    pub fn new(repo: Arc<GitRepository>) -> Self {
        Self {
            repo,
            batch_size: 256,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Negotiates and, after `done`, computes the object set. Blocking.
    pub fn prepare(&self, body: Bytes) -> Result<UploadPackResponse> {
        let request = NegotiationRequest::parse(body)?;
        if request.wants.is_empty() {
            return Ok(UploadPackResponse {
                preamble: Bytes::new(),
                objects: None,
                sideband: SidebandMode::None,
            });
        }

        let odb = self.repo.odb();
        for want in &request.wants {
            if !odb.has(want)? {
                return Err(FrontendError::ObjectNotFound(format!(
                    "want {} is not in {}",
                    want,
                    self.repo.id()
                )));
            }
        }

        let response = negotiate(&request, |oid| Ok(odb.has(oid)?))?;
        let mut writer = PktLineWriter::new();
        response.write_to(&mut writer)?;
        debug!(
            repo_id = %self.repo.id(),
            wants = request.wants.len(),
            haves = request.haves.len(),
            done = request.done,
            ack = ?response.common(),
            "negotiated"
        );

        let objects = if request.done {
            Some(
                self.repo
                    .graph()
                    .objects_for_pack(&request.wants, &request.haves)?,
            )
        } else {
            None
        };

        Ok(UploadPackResponse {
            preamble: writer.into_bytes(),
            objects,
            sideband: request.capabilities.sideband(),
        })
    }

    pub fn into_stream(self, response: UploadPackResponse) -> ReceiverStream<Result<Bytes>> {
        let odb = self.repo.odb().clone();
        let repo_id = self.repo.id().to_string();
        stream_response(odb, repo_id, response, self.batch_size)
    }
}

/// Streams preamble then pack through a bounded channel. The producer runs
/// on the blocking pool and stops as soon as the receiver is dropped.
pub fn stream_response(
    odb: Arc<ObjectDatabase>,
    repo_id: String,
    response: UploadPackResponse,
    batch_size: usize,
) -> ReceiverStream<Result<Bytes>> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let UploadPackResponse {
            preamble,
            objects,
            sideband,
        } = response;

        if !preamble.is_empty() && tx.blocking_send(Ok(preamble)).is_err() {
            return;
        }
        let Some(objects) = objects else {
            return;
        };

        let result = write_pack(&odb, &objects, batch_size, |chunk| {
            tx.blocking_send(Ok(sideband.frame(Band::Data, &chunk))).is_ok()
        });

        match result {
            Ok(stats) if stats.completed => {
                if sideband.is_enabled()
                    && tx.blocking_send(Ok(Bytes::from_static(FLUSH_PKT))).is_err()
                {
                    return;
                }
                telemetry::record_pack_objects("sent", stats.objects);
                telemetry::record_bytes("sent", stats.bytes);
                info!(repo_id = %repo_id, objects = stats.objects, bytes = stats.bytes, "pack sent");
            }
            Ok(stats) => {
                debug!(repo_id = %repo_id, objects = stats.objects, "client went away during pack");
            }
            Err(e) => {
                warn!(repo_id = %repo_id, error = %e, "pack generation failed");
                if sideband.is_enabled() {
                    let msg = format!("error: {}\n", e);
                    let _ = tx.blocking_send(Ok(sideband.frame(Band::Error, msg.as_bytes())));
                }
                let _ = tx.blocking_send(Err(e));
            }
        }
    });

    ReceiverStream::new(rx)
}
