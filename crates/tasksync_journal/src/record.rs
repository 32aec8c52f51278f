//! Journal record framing.
//!
//! Every record on disk is laid out as:
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it.

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"TSJL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + len (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// A single journal record: a kind tag plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Caller-defined record kind.
    pub kind: u8,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl JournalRecord {
    /// Creates a record.
    pub fn new(kind: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Size of the framed record in bytes.
    #[must_use]
    pub fn framed_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    /// Frames the record for appending.
    ///
    /// Returns `None` if the payload does not fit the 4-byte length field.
    #[must_use]
    pub fn encode(&self) -> Option<Vec<u8>> {
        let len = u32::try_from(self.payload.len()).ok()?;

        let mut data = Vec::with_capacity(self.framed_len());
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.kind);
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&self.payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Some(data)
    }
}

/// Outcome of decoding one frame from a buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decoded {
    /// A valid record and the number of bytes it occupied.
    Record(JournalRecord, usize),
    /// The buffer ends before the frame does.
    Incomplete,
    /// The frame is invalid. `frame_len` is the declared frame length when
    /// the header itself was readable.
    Invalid {
        /// What failed.
        message: String,
        /// Declared length of the frame, if known.
        frame_len: Option<usize>,
    },
}

/// Decodes the frame at the start of `buf`.
pub(crate) fn decode_frame(buf: &[u8]) -> Decoded {
    if buf.len() < HEADER_SIZE {
        return Decoded::Incomplete;
    }

    if buf[0..4] != JOURNAL_MAGIC {
        return Decoded::Invalid {
            message: "bad magic".into(),
            frame_len: None,
        };
    }

    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version != JOURNAL_VERSION {
        return Decoded::Invalid {
            message: format!("unsupported version {version}"),
            frame_len: None,
        };
    }

    let kind = buf[6];
    let len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;

    if buf.len() < total {
        return Decoded::Incomplete;
    }

    let payload_end = HEADER_SIZE + len;
    let stored = u32::from_le_bytes([
        buf[payload_end],
        buf[payload_end + 1],
        buf[payload_end + 2],
        buf[payload_end + 3],
    ]);
    let computed = compute_crc32(&buf[..payload_end]);
    if stored != computed {
        return Decoded::Invalid {
            message: format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
            frame_len: Some(total),
        };
    }

    Decoded::Record(
        JournalRecord::new(kind, buf[HEADER_SIZE..payload_end].to_vec()),
        total,
    )
}

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    !crc
}
