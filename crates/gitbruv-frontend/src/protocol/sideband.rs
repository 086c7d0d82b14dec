use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Band {
    Data = 1,
    Progress = 2,
    Error = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidebandMode {
    #[default]
    None,
    /// 1000-byte packets.
    SideBand,
    /// 65520-byte packets.
    SideBand64k,
}

impl SidebandMode {
    /// Largest payload per packet, excluding length prefix and band byte.
    pub fn max_payload(&self) -> Option<usize> {
        match self {
            SidebandMode::None => None,
            SidebandMode::SideBand => Some(1000 - 5),
            SidebandMode::SideBand64k => Some(65520 - 5),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, SidebandMode::None)
    }

    /// Frames `data` on `band`, splitting it across as many packets as needed.
    /// Without side-band the bytes pass through unchanged.
    pub fn frame(&self, band: Band, data: &[u8]) -> Bytes {
        let Some(max) = self.max_payload() else {
            return Bytes::copy_from_slice(data);
        };

        let packets = data.len().div_ceil(max).max(1);
        let mut buf = BytesMut::with_capacity(data.len() + packets * 5);
        for chunk in data.chunks(max) {
            buf.put_slice(format!("{:04x}", chunk.len() + 5).as_bytes());
            buf.put_u8(band as u8);
            buf.put_slice(chunk);
        }
        buf.freeze()
    }
}
