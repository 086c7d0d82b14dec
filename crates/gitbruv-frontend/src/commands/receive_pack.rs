use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use gitbruv_core::{Oid, RefName};
use gitbruv_storage::{GitRepository, StoreError};
use tracing::{debug, info, warn};

use crate::error::{FrontendError, Result};
use crate::protocol::{
    Band, PktLine, PktLineReader, PktLineWriter, ReceivePackCapabilities, SidebandMode, FLUSH_PKT,
};
use crate::telemetry;

pub const FORCE_PUSH_OPTION: &str = "force";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub ref_name: String,
    pub old_oid: Oid,
    pub new_oid: Oid,
}

impl RefUpdate {
    pub fn new(ref_name: impl Into<String>, old_oid: Oid, new_oid: Oid) -> Self {
        Self {
            ref_name: ref_name.into(),
            old_oid,
            new_oid,
        }
    }

    pub fn is_create(&self) -> bool {
        self.old_oid.is_zero()
    }

    pub fn is_delete(&self) -> bool {
        self.new_oid.is_zero()
    }

    pub fn is_update(&self) -> bool {
        !self.is_create() && !self.is_delete()
    }

    fn expected(&self) -> Option<Oid> {
        (!self.old_oid.is_zero()).then_some(self.old_oid)
    }

    fn target(&self) -> Option<Oid> {
        (!self.new_oid.is_zero()).then_some(self.new_oid)
    }

    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(FrontendError::InvalidProtocol(format!(
                "invalid ref update: {}",
                line
            )));
        }

        let old_oid = Oid::from_hex(parts[0])
            .map_err(|e| FrontendError::InvalidProtocol(format!("invalid old oid: {}", e)))?;
        let new_oid = Oid::from_hex(parts[1])
            .map_err(|e| FrontendError::InvalidProtocol(format!("invalid new oid: {}", e)))?;
        Ok(Self::new(parts[2], old_oid, new_oid))
    }
}

impl fmt::Display for RefUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.old_oid, self.new_oid, self.ref_name)
    }
}

/// Decoded body of a `git-receive-pack` POST.
#[derive(Debug, Clone, Default)]
pub struct PushRequest {
    pub updates: Vec<RefUpdate>,
    pub capabilities: ReceivePackCapabilities,
    pub push_options: Vec<String>,
    pub pack: Bytes,
}

impl PushRequest {
    pub fn parse(body: impl Into<Bytes>) -> Result<Self> {
        let mut reader = PktLineReader::new(body);
        let mut request = Self::default();

        loop {
            let pkt = match reader.read_pkt()? {
                None | Some(PktLine::Flush) => break,
                Some(pkt) => pkt,
            };
            let line = pkt.as_text().ok_or_else(|| {
                FrontendError::InvalidProtocol("ref update is not utf-8".to_string())
            })?;

            let command = if request.updates.is_empty() {
                match line.split_once('\0') {
                    Some((command, caps)) => {
                        request.capabilities = ReceivePackCapabilities::parse(caps);
                        command
                    }
                    None => line,
                }
            } else {
                line
            };
            request.updates.push(RefUpdate::parse(command)?);
        }

        if request.capabilities.push_options && !request.updates.is_empty() {
            for pkt in reader.read_until_flush()? {
                if let Some(option) = pkt.as_text() {
                    request.push_options.push(option.to_string());
                }
            }
        }

        request.pack = reader.remaining();
        Ok(request)
    }

    pub fn force_requested(&self) -> bool {
        self.push_options.iter().any(|o| o == FORCE_PUSH_OPTION)
    }
}

/// Ref value the client expected versus the one found under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleRef {
    pub expected: String,
    pub found: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdateResult {
    pub ref_name: String,
    pub error: Option<String>,
    /// Set when the ref moved underneath the push.
    pub conflict: Option<StaleRef>,
}

impl RefUpdateResult {
    pub fn ok(ref_name: impl Into<String>) -> Self {
        Self {
            ref_name: ref_name.into(),
            error: None,
            conflict: None,
        }
    }

    pub fn error(ref_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ref_name: ref_name.into(),
            error: Some(error.into()),
            conflict: None,
        }
    }

    fn stale(ref_name: impl Into<String>, stale: StaleRef) -> Self {
        Self {
            conflict: Some(stale),
            ..Self::error(ref_name, "failed to lock")
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_report_line(&self) -> String {
        match &self.error {
            None => format!("ok {}", self.ref_name),
            Some(reason) => format!("ng {} {}", self.ref_name, reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// `None` when the pack unpacked cleanly, else the reason.
    pub unpack_error: Option<String>,
    pub updates: Vec<RefUpdateResult>,
    pub objects_received: usize,
}

impl PushReport {
    pub fn all_successful(&self) -> bool {
        self.unpack_error.is_none() && self.updates.iter().all(|u| u.is_ok())
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.unpack_error.is_none()
    }

    /// report-status lines, wrapped in band 1 for side-band clients.
    pub fn encode(&self, sideband: SidebandMode) -> Result<Bytes> {
        let mut status = PktLineWriter::new();
        match &self.unpack_error {
            None => status.write_line("unpack ok")?,
            Some(reason) => status.write_line(&format!("unpack {}", reason))?,
        }
        for update in &self.updates {
            status.write_line(&update.to_report_line())?;
        }
        status.write_flush();
        let status = status.into_bytes();

        if !sideband.is_enabled() {
            return Ok(status);
        }
        let mut out = PktLineWriter::new();
        out.write_raw(&sideband.frame(Band::Data, &status));
        out.write_raw(FLUSH_PKT);
        Ok(out.into_bytes())
    }

    /// HTTP-level failure for clients that did not ask for report-status.
    pub fn status_error(&self) -> Option<FrontendError> {
        if let Some(reason) = &self.unpack_error {
            return Some(FrontendError::UnpackFailed(reason.clone()));
        }
        self.updates.iter().find_map(|u| {
            let stale = u.conflict.as_ref()?;
            Some(FrontendError::Storage(StoreError::ConflictingUpdate {
                ref_name: u.ref_name.clone(),
                expected: stale.expected.clone(),
                found: stale.found.clone(),
            }))
        })
    }
}

/// Push side of the smart-HTTP protocol for one repository.
pub struct GitReceivePack {
    repo: Arc<GitRepository>,
    deny_non_fast_forwards: bool,
}

impl GitReceivePack {
    pub fn new(repo: Arc<GitRepository>) -> Self {
        Self {
            repo,
            deny_non_fast_forwards: true,
        }
    }

    pub fn with_deny_non_fast_forwards(mut self, deny: bool) -> Self {
        self.deny_non_fast_forwards = deny;
        self
    }

    /// Ingests the pack, then applies each command independently. Blocking.
    pub fn handle_push(&self, request: &PushRequest) -> Result<PushReport> {
        let mut report = PushReport::default();
        if request.updates.is_empty() {
            return Ok(report);
        }

        let names: Vec<std::result::Result<RefName, String>> = request
            .updates
            .iter()
            .map(|u| {
                RefName::new(u.ref_name.as_str())
                    .map_err(|e| e.to_string())
                    .and_then(|name| {
                        if name.is_head() {
                            Err("HEAD cannot be pushed to".to_string())
                        } else {
                            Ok(name)
                        }
                    })
            })
            .collect();

        if !request.pack.is_empty() {
            match self.repo.odb().ingest_pack(&request.pack) {
                Ok(summary) => {
                    report.objects_received = summary.objects;
                    telemetry::record_pack_objects("received", summary.objects);
                    telemetry::record_bytes("received", request.pack.len());
                    debug!(
                        repo_id = %self.repo.id(),
                        objects = summary.objects,
                        new_objects = summary.new_objects,
                        kept_pack = ?summary.kept_pack,
                        "pack ingested"
                    );
                }
                Err(e) => {
                    warn!(repo_id = %self.repo.id(), error = %e, "pack rejected");
                    report.unpack_error = Some(e.to_string());
                    report.updates = request
                        .updates
                        .iter()
                        .map(|u| RefUpdateResult::error(&u.ref_name, "unpacker error"))
                        .collect();
                    return Ok(report);
                }
            }
        }

        let force = request.force_requested() || !self.deny_non_fast_forwards;
        for (update, name) in request.updates.iter().zip(names) {
            let result = match name {
                Ok(name) => self.apply_update(update, &name, force),
                Err(reason) => RefUpdateResult::error(&update.ref_name, reason),
            };
            telemetry::record_ref_update(result.is_ok());
            match &result.error {
                None => info!(repo_id = %self.repo.id(), ref_name = %update.ref_name, new = %update.new_oid, "ref updated"),
                Some(reason) => info!(repo_id = %self.repo.id(), ref_name = %update.ref_name, reason = %reason, "ref update rejected"),
            }
            report.updates.push(result);
        }

        Ok(report)
    }

    fn apply_update(&self, update: &RefUpdate, name: &RefName, force: bool) -> RefUpdateResult {
        if let Err(reason) = self.check_update(update, name, force) {
            return RefUpdateResult::error(name.as_str(), reason);
        }

        match self
            .repo
            .refs()
            .compare_and_swap(name, update.expected(), update.target())
        {
            Ok(()) => RefUpdateResult::ok(name.as_str()),
            Err(StoreError::ConflictingUpdate {
                expected, found, ..
            }) => RefUpdateResult::stale(name.as_str(), StaleRef { expected, found }),
            Err(e) => RefUpdateResult::error(name.as_str(), e.to_string()),
        }
    }

    fn check_update(
        &self,
        update: &RefUpdate,
        name: &RefName,
        force: bool,
    ) -> std::result::Result<(), String> {
        if update.is_delete() {
            return Ok(());
        }

        let odb = self.repo.odb();
        match odb.has(&update.new_oid) {
            Ok(true) => {}
            Ok(false) => return Err("missing necessary objects".to_string()),
            Err(e) => return Err(e.to_string()),
        }
        if name.is_branch() {
            if let Err(e) = odb.peel_to_commit(&update.new_oid) {
                return Err(format!("not a commit: {}", e));
            }
        }

        if update.is_update() && name.is_branch() && !force {
            match self.repo.graph().is_ancestor(&update.old_oid, &update.new_oid) {
                Ok(true) => {}
                Ok(false) => return Err("non-fast-forward".to_string()),
                Err(e) if e.is_not_found() => return Err("non-fast-forward".to_string()),
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }
}
