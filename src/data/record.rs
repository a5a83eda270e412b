//! Log record codec.
//!
//! # Record format
//!
//! Each record on disk is self-describing and CRC-protected:
//!
//! ```text
//! +--------+------+-----------+-------------+-----+-------+
//! | crc32  | type | key_len   | value_len   | key | value |
//! | 4 B    | 1 B  | varint<=5 | varint<=5   |  K  |  V    |
//! +--------+------+-----------+-------------+-----+-------+
//! ```
//!
//! - `crc32` is the IEEE polynomial over everything after itself,
//!   little-endian encoded.
//! - Key and value lengths are signed (zigzag) varints.
//! - The key stored on disk is the user key prefixed with an unsigned-varint
//!   sequence number; sequence `0` marks a plain non-batch write. The index
//!   and the public API only ever see the unprefixed user key.
//!
//! A header whose CRC and both lengths are zero marks the logical end of a
//! data file.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::encoding::{
    decode_uvarint, decode_varint, encode_uvarint, encode_varint, MAX_UVARINT_LEN,
    MAX_VARINT32_LEN,
};
use crate::error::{Error, Result};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub(crate) const CRC_SIZE: usize = 4;

/// Largest possible record header: crc + type + two size varints.
pub const MAX_HEADER_SIZE: usize = CRC_SIZE + 1 + 2 * MAX_VARINT32_LEN;

/// Largest possible encoded position: file id varint + offset varint.
pub const MAX_POS_SIZE: usize = MAX_VARINT32_LEN + MAX_UVARINT_LEN;

/// Sequence number carried by records written outside a batch.
pub const NON_BATCH_SEQ_NO: u64 = 0;

/// Kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// A live key-value pair.
    Normal = 0,
    /// A tombstone.
    Deleted = 1,
    /// Terminal marker sealing all records of one batch commit.
    TxFinished = 2,
}

impl RecordType {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(RecordType::Normal),
            1 => Ok(RecordType::Deleted),
            2 => Ok(RecordType::TxFinished),
            other => Err(Error::CorruptRecord(format!(
                "invalid record type {other}"
            ))),
        }
    }
}

/// One entry in a data file. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: RecordType,
}

impl LogRecord {
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            rec_type: RecordType::Normal,
        }
    }

    pub fn deleted(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: RecordType::Deleted,
        }
    }

    /// Serialize the record, CRC included.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.push(self.rec_type as u8);
        encode_varint(self.key.len() as i64, &mut buf);
        encode_varint(self.value.len() as i64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = CRC32.checksum(&buf[CRC_SIZE..]);
        LittleEndian::write_u32(&mut buf[..CRC_SIZE], crc);
        buf
    }
}

/// Decoded record header.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordHeader {
    pub crc: u32,
    pub rec_type: RecordType,
    pub key_size: usize,
    pub value_size: usize,
    /// Bytes the header occupies on disk.
    pub len: usize,
}

/// Decode a record header from the front of `buf`.
///
/// Returns `Ok(None)` when the bytes mark the logical end of the file: a
/// buffer too short to hold any header, or the all-zero header left behind
/// by reading past the last record.
pub(crate) fn decode_header(buf: &[u8]) -> Result<Option<RecordHeader>> {
    if buf.len() <= CRC_SIZE || buf.iter().all(|&b| b == 0) {
        return Ok(None);
    }

    let crc = LittleEndian::read_u32(&buf[..CRC_SIZE]);
    let type_byte = buf[CRC_SIZE];
    let mut at = CRC_SIZE + 1;

    let (key_size, n) = decode_varint(&buf[at..])?;
    at += n;
    let (value_size, n) = decode_varint(&buf[at..])?;
    at += n;

    if crc == 0 && key_size == 0 && value_size == 0 {
        return Ok(None);
    }
    if key_size < 0 || value_size < 0 {
        return Err(Error::CorruptRecord(format!(
            "negative record sizes: key {key_size}, value {value_size}"
        )));
    }

    Ok(Some(RecordHeader {
        crc,
        rec_type: RecordType::from_u8(type_byte)?,
        key_size: key_size as usize,
        value_size: value_size as usize,
        len: at,
    }))
}

/// CRC over the header tail (everything after the crc field) plus key and value.
pub(crate) fn record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(header_tail);
    digest.update(key);
    digest.update(value);
    digest.finalize()
}

/// Location of a record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPos {
    pub file_id: u32,
    pub offset: u64,
}

impl RecordPos {
    pub fn new(file_id: u32, offset: u64) -> Self {
        Self { file_id, offset }
    }

    /// Compact encoding used inside hint records and the persistent index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_POS_SIZE);
        encode_varint(i64::from(self.file_id), &mut buf);
        encode_varint(self.offset as i64, &mut buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (file_id, n) = decode_varint(buf)?;
        let (offset, _) = decode_varint(&buf[n..])?;
        if file_id < 0 || offset < 0 {
            return Err(Error::CorruptRecord(format!(
                "negative position: file {file_id}, offset {offset}"
            )));
        }
        Ok(Self {
            file_id: file_id as u32,
            offset: offset as u64,
        })
    }
}

/// Prefix `key` with `seq_no` for storage in the log.
pub(crate) fn key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut enc = Vec::with_capacity(key.len() + 1);
    encode_uvarint(seq_no, &mut enc);
    enc.extend_from_slice(key);
    enc
}

/// Split a stored key into its sequence number and the user key.
pub(crate) fn parse_seq_key(key: &[u8]) -> Result<(u64, &[u8])> {
    let (seq_no, n) = decode_uvarint(key)?;
    Ok((seq_no, &key[n..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_normal_record() {
        let rec = LogRecord::normal(b"name".to_vec(), b"cinderdb".to_vec());
        let enc = rec.encode();
        assert_eq!(
            enc,
            [
                223, 2, 255, 213, 0, 8, 16, 110, 97, 109, 101, 99, 105, 110, 100, 101, 114, 100,
                98
            ]
        );
    }

    #[test]
    fn test_encode_empty_value_record() {
        let rec = LogRecord::normal(b"name".to_vec(), Vec::new());
        assert_eq!(rec.encode(), [9, 252, 88, 14, 0, 8, 0, 110, 97, 109, 101]);
    }

    #[test]
    fn test_encode_tombstone_record() {
        let rec = LogRecord {
            key: b"name".to_vec(),
            value: b"cinderdb".to_vec(),
            rec_type: RecordType::Deleted,
        };
        let enc = rec.encode();
        assert_eq!(
            enc,
            [
                55, 217, 4, 108, 1, 8, 16, 110, 97, 109, 101, 99, 105, 110, 100, 101, 114, 100,
                98
            ]
        );
    }

    #[test]
    fn test_decode_header() {
        let header = decode_header(&[223, 2, 255, 213, 0, 8, 16])
            .unwrap()
            .unwrap();
        assert_eq!(header.crc, 3590259423);
        assert_eq!(header.rec_type, RecordType::Normal);
        assert_eq!(header.key_size, 4);
        assert_eq!(header.value_size, 8);
        assert_eq!(header.len, 7);

        let header = decode_header(&[55, 217, 4, 108, 1, 8, 16]).unwrap().unwrap();
        assert_eq!(header.rec_type, RecordType::Deleted);
    }

    #[test]
    fn test_decode_header_end_of_file() {
        // Too short to hold a header.
        assert_eq!(decode_header(&[1, 2, 3]).unwrap(), None);
        // All-zero header.
        assert_eq!(decode_header(&[0u8; 15]).unwrap(), None);
    }

    #[test]
    fn test_decode_header_bad_type() {
        // Valid sizes but an unknown type byte.
        assert!(decode_header(&[1, 0, 0, 0, 9, 8, 16]).is_err());
    }

    #[test]
    fn test_record_crc_matches_encoder() {
        let rec = LogRecord::normal(b"name".to_vec(), b"cinderdb".to_vec());
        let enc = rec.encode();
        let header = decode_header(&enc).unwrap().unwrap();
        let crc = record_crc(&enc[CRC_SIZE..header.len], &rec.key, &rec.value);
        assert_eq!(crc, header.crc);
        assert_eq!(crc, 3590259423);
    }

    #[test]
    fn test_pos_roundtrip() {
        for pos in [
            RecordPos::new(0, 0),
            RecordPos::new(1, 128),
            RecordPos::new(u32::MAX, u64::MAX / 2),
        ] {
            let enc = pos.encode();
            assert!(enc.len() <= MAX_POS_SIZE);
            assert_eq!(RecordPos::decode(&enc).unwrap(), pos);
        }
    }

    #[test]
    fn test_seq_key_roundtrip() {
        for seq in [0u64, 1, 300, u64::MAX] {
            let enc = key_with_seq(b"answer", seq);
            let (parsed, key) = parse_seq_key(&enc).unwrap();
            assert_eq!(parsed, seq);
            assert_eq!(key, b"answer");
        }
    }

    #[test]
    fn test_non_batch_seq_prefix_is_one_zero_byte() {
        let enc = key_with_seq(b"answer", NON_BATCH_SEQ_NO);
        assert_eq!(enc[0], 0);
        assert_eq!(&enc[1..], b"answer");
    }
}
