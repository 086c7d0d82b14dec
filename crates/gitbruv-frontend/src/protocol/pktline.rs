use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrontendError, Result};

pub const FLUSH_PKT: &[u8; 4] = b"0000";
pub const DELIM_PKT: &[u8; 4] = b"0001";
/// Largest packet including the 4-byte length prefix.
pub const MAX_PKT_LEN: usize = 65520;
pub const MAX_PKT_DATA_LEN: usize = MAX_PKT_LEN - 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Bytes),
    Flush,
    Delim,
}

impl PktLine {
    pub fn data(data: impl Into<Bytes>) -> Self {
        PktLine::Data(data.into())
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, PktLine::Flush)
    }

    pub fn as_data(&self) -> Option<&Bytes> {
        match self {
            PktLine::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Payload as text with a single trailing newline removed.
    pub fn as_text(&self) -> Option<&str> {
        let data = self.as_data()?;
        let data = data.strip_suffix(b"\n").unwrap_or(data);
        std::str::from_utf8(data).ok()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            PktLine::Flush => buf.put_slice(FLUSH_PKT),
            PktLine::Delim => buf.put_slice(DELIM_PKT),
            PktLine::Data(data) => {
                if data.len() > MAX_PKT_DATA_LEN {
                    return Err(FrontendError::InvalidProtocol(format!(
                        "pkt-line payload of {} bytes exceeds {}",
                        data.len(),
                        MAX_PKT_DATA_LEN
                    )));
                }
                buf.put_slice(format!("{:04x}", data.len() + 4).as_bytes());
                buf.put_slice(data);
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Accumulates encoded packets into one buffer.
#[derive(Debug, Default)]
pub struct PktLineWriter {
    buf: BytesMut,
}

impl PktLineWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_data(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        PktLine::data(Bytes::copy_from_slice(data.as_ref())).encode_into(&mut self.buf)
    }

    /// Writes `line` followed by `\n`.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write_data(data)
    }

    pub fn write_flush(&mut self) {
        self.buf.put_slice(FLUSH_PKT);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads packets from an in-memory request body.
pub struct PktLineReader {
    data: Bytes,
    pos: usize,
}

impl PktLineReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn read_pkt(&mut self) -> Result<Option<PktLine>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let Some(len_buf) = self.data.get(self.pos..self.pos + 4) else {
            return Err(FrontendError::InvalidProtocol(
                "truncated pkt-line length".to_string(),
            ));
        };

        if len_buf == FLUSH_PKT {
            self.pos += 4;
            return Ok(Some(PktLine::Flush));
        }
        if len_buf == DELIM_PKT {
            self.pos += 4;
            return Ok(Some(PktLine::Delim));
        }

        let len_str = std::str::from_utf8(len_buf).map_err(|e| {
            FrontendError::InvalidProtocol(format!("invalid pkt-line length: {}", e))
        })?;
        let len = usize::from_str_radix(len_str, 16).map_err(|e| {
            FrontendError::InvalidProtocol(format!("invalid pkt-line length: {}", e))
        })?;
        if len < 4 {
            return Err(FrontendError::InvalidProtocol(format!(
                "pkt-line length too small: {}",
                len
            )));
        }

        let end = self.pos + len;
        if end > self.data.len() {
            return Err(FrontendError::InvalidProtocol(format!(
                "pkt-line of {} bytes truncated",
                len
            )));
        }
        let payload = self.data.slice(self.pos + 4..end);
        self.pos = end;
        Ok(Some(PktLine::Data(payload)))
    }

    /// Data packets up to and excluding the next flush.
    pub fn read_until_flush(&mut self) -> Result<Vec<PktLine>> {
        let mut packets = Vec::new();
        while let Some(pkt) = self.read_pkt()? {
            if pkt.is_flush() {
                break;
            }
            packets.push(pkt);
        }
        Ok(packets)
    }

    /// Bytes not yet consumed, e.g. a pack following the commands.
    pub fn remaining(&self) -> Bytes {
        self.data.slice(self.pos.min(self.data.len())..)
    }
}
