//! WAL frame encode/decode and checksum (spec.md §4.6).
//!
//! Layout: `[type:u8][page_id:u32][payload_len:u32][payload][checksum:u64]
//! [lsn:u64]`. The checksum covers every byte before the checksum field
//! (header fields and payload), per spec.md §4.6's explicit frame diagram.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub const FRAME_TYPE_PAGE: u8 = 0;
pub const FRAME_TYPE_COMMIT: u8 = 1;
pub const FRAME_TYPE_CHECKPOINT: u8 = 2;

pub const FRAME_HDR_SIZE: usize = 1 + 4 + 4; // type + page_id + payload_len
pub const FRAME_TRAILER_SIZE: usize = 8 + 8; // checksum + lsn

#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: u8,
    pub page_id: u32,
    pub payload: Vec<u8>,
    pub lsn: u64,
}

impl Frame {
    pub fn page(page_id: u32, payload: Vec<u8>, lsn: u64) -> Self {
        Self {
            frame_type: FRAME_TYPE_PAGE,
            page_id,
            payload,
            lsn,
        }
    }

    pub fn commit(lsn: u64) -> Self {
        Self {
            frame_type: FRAME_TYPE_COMMIT,
            page_id: 0,
            payload: Vec::new(),
            lsn,
        }
    }

    pub fn checkpoint(lsn: u64) -> Self {
        Self {
            frame_type: FRAME_TYPE_CHECKPOINT,
            page_id: 0,
            payload: Vec::new(),
            lsn,
        }
    }

    pub fn encoded_len(&self) -> usize {
        FRAME_HDR_SIZE + self.payload.len() + FRAME_TRAILER_SIZE
    }

    /// Encodes the frame, computing the checksum over header+payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.frame_type);
        let mut tmp4 = [0u8; 4];
        LittleEndian::write_u32(&mut tmp4, self.page_id);
        buf.extend_from_slice(&tmp4);
        LittleEndian::write_u32(&mut tmp4, self.payload.len() as u32);
        buf.extend_from_slice(&tmp4);
        buf.extend_from_slice(&self.payload);

        let checksum = checksum_of(&buf);
        let mut tmp8 = [0u8; 8];
        LittleEndian::write_u64(&mut tmp8, checksum);
        buf.extend_from_slice(&tmp8);
        LittleEndian::write_u64(&mut tmp8, self.lsn);
        buf.extend_from_slice(&tmp8);
        buf
    }

    /// Decodes a single frame from the front of `buf`. Returns the frame and
    /// the number of bytes consumed, or `Ok(None)` if `buf` doesn't yet hold
    /// a complete frame (a torn tail, not a corruption).
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < FRAME_HDR_SIZE {
            return Ok(None);
        }
        let frame_type = buf[0];
        let page_id = LittleEndian::read_u32(&buf[1..5]);
        let payload_len = LittleEndian::read_u32(&buf[5..9]) as usize;
        let total = FRAME_HDR_SIZE + payload_len + FRAME_TRAILER_SIZE;
        if buf.len() < total {
            return Ok(None);
        }
        let payload = buf[FRAME_HDR_SIZE..FRAME_HDR_SIZE + payload_len].to_vec();
        let checksum_off = FRAME_HDR_SIZE + payload_len;
        let stored_checksum = LittleEndian::read_u64(&buf[checksum_off..checksum_off + 8]);
        let lsn = LittleEndian::read_u64(&buf[checksum_off + 8..checksum_off + 16]);

        let computed = checksum_of(&buf[..checksum_off]);
        if computed != stored_checksum {
            return Err(Error::corruption(format!(
                "WAL frame checksum mismatch: stored {stored_checksum:#x}, computed {computed:#x}"
            )));
        }

        Ok(Some((
            Frame {
                frame_type,
                page_id,
                payload,
                lsn,
            },
            total,
        )))
    }
}

fn checksum_of(bytes: &[u8]) -> u64 {
    crc32c::crc32c(bytes) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_frame_roundtrips() {
        let frame = Frame::page(7, vec![1, 2, 3, 4], 42);
        let encoded = frame.encode();
        let (decoded, consumed) = Frame::decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.frame_type, FRAME_TYPE_PAGE);
        assert_eq!(decoded.page_id, 7);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
        assert_eq!(decoded.lsn, 42);
    }

    #[test]
    fn commit_and_checkpoint_frames_have_empty_payload() {
        let commit = Frame::commit(10);
        let (decoded, _) = Frame::decode(&commit.encode()).unwrap().unwrap();
        assert_eq!(decoded.frame_type, FRAME_TYPE_COMMIT);
        assert!(decoded.payload.is_empty());

        let checkpoint = Frame::checkpoint(11);
        let (decoded, _) = Frame::decode(&checkpoint.encode()).unwrap().unwrap();
        assert_eq!(decoded.frame_type, FRAME_TYPE_CHECKPOINT);
    }

    #[test]
    fn truncated_tail_reports_none_not_error() {
        let frame = Frame::page(1, vec![0u8; 20], 5);
        let mut encoded = frame.encode();
        encoded.truncate(encoded.len() - 3);
        assert!(Frame::decode(&encoded).unwrap().is_none());
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let frame = Frame::page(1, vec![9u8; 10], 3);
        let mut encoded = frame.encode();
        encoded[FRAME_HDR_SIZE] ^= 0xFF;
        assert!(Frame::decode(&encoded).is_err());
    }
}
