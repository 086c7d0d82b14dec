use std::collections::HashSet;
use std::fmt;

use gitbruv_core::Oid;

use super::capabilities::Capabilities;
use super::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::error::{FrontendError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationLine {
    /// `want <oid>`; the first one may carry the client's capabilities.
    Want(Oid, Option<String>),
    Have(Oid),
    Done,
}

impl NegotiationLine {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches('\n');

        if line.trim() == "done" {
            return Ok(NegotiationLine::Done);
        }

        if let Some(rest) = line.strip_prefix("want ") {
            let (hex, caps) = match rest.split_once(' ') {
                Some((hex, caps)) => (hex, Some(caps.to_string())),
                None => (rest, None),
            };
            return Ok(NegotiationLine::Want(parse_oid(hex)?, caps));
        }

        if let Some(rest) = line.strip_prefix("have ") {
            return Ok(NegotiationLine::Have(parse_oid(rest.trim())?));
        }

        Err(FrontendError::InvalidProtocol(format!(
            "unknown negotiation line: {}",
            line
        )))
    }
}

impl fmt::Display for NegotiationLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationLine::Want(oid, Some(caps)) => write!(f, "want {} {}", oid, caps),
            NegotiationLine::Want(oid, None) => write!(f, "want {}", oid),
            NegotiationLine::Have(oid) => write!(f, "have {}", oid),
            NegotiationLine::Done => write!(f, "done"),
        }
    }
}

fn parse_oid(hex: &str) -> Result<Oid> {
    Oid::from_hex(hex.trim())
        .map_err(|e| FrontendError::InvalidProtocol(format!("invalid oid: {}", e)))
}

/// One stateless upload-pack round as sent by the client.
#[derive(Debug, Clone, Default)]
pub struct NegotiationRequest {
    pub wants: Vec<Oid>,
    pub haves: Vec<Oid>,
    pub capabilities: Capabilities,
    pub done: bool,
    seen_wants: HashSet<Oid>,
    seen_haves: HashSet<Oid>,
}

impl NegotiationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `want` lines, flush, `have` lines, up to `done` or end of body.
    pub fn parse(body: impl Into<bytes::Bytes>) -> Result<Self> {
        let mut reader = PktLineReader::new(body);
        let mut request = Self::new();

        while let Some(pkt) = reader.read_pkt()? {
            let PktLine::Data(_) = pkt else {
                continue;
            };
            let line = pkt.as_text().ok_or_else(|| {
                FrontendError::InvalidProtocol("negotiation line is not utf-8".to_string())
            })?;
            if line.is_empty() {
                continue;
            }

            match NegotiationLine::parse(line)? {
                NegotiationLine::Want(oid, caps) => {
                    if request.wants.is_empty() {
                        if let Some(caps) = caps {
                            request.capabilities = Capabilities::parse(&caps);
                        }
                    }
                    request.add_want(oid);
                }
                NegotiationLine::Have(oid) => request.add_have(oid),
                NegotiationLine::Done => {
                    request.done = true;
                    break;
                }
            }
        }

        Ok(request)
    }

    pub fn add_want(&mut self, oid: Oid) {
        if self.seen_wants.insert(oid) {
            self.wants.push(oid);
        }
    }

    pub fn add_have(&mut self, oid: Oid) {
        if self.seen_haves.insert(oid) {
            self.haves.push(oid);
        }
    }

    pub fn is_clone(&self) -> bool {
        self.haves.is_empty()
    }
}

/// Server answer for a single-ack negotiation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationResponse {
    Ack(Oid),
    Nak,
}

impl NegotiationResponse {
    pub fn common(&self) -> Option<Oid> {
        match self {
            NegotiationResponse::Ack(oid) => Some(*oid),
            NegotiationResponse::Nak => None,
        }
    }

    pub fn write_to(&self, writer: &mut PktLineWriter) -> Result<()> {
        writer.write_line(&self.to_string())
    }
}

impl fmt::Display for NegotiationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationResponse::Ack(oid) => write!(f, "ACK {}", oid),
            NegotiationResponse::Nak => write!(f, "NAK"),
        }
    }
}

/// Acknowledges the first have the server possesses, or NAKs.
pub fn negotiate<F>(request: &NegotiationRequest, mut has: F) -> Result<NegotiationResponse>
where
    F: FnMut(&Oid) -> Result<bool>,
{
    for have in &request.haves {
        if has(have)? {
            return Ok(NegotiationResponse::Ack(*have));
        }
    }
    Ok(NegotiationResponse::Nak)
}
