//! Storage frame codec
//!
//! # Binary Format (per frame)
//! ```text
//! [compressed_len: u64 big-endian]
//! [payload: zstd(bincode(record)), compressed_len bytes]
//! ```
//!
//! The length prefix and payload are assembled into one buffer and written
//! with a single call so a frame is never split across appends.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read};

use crate::error::StorageError;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 8;

/// Declared lengths above this are treated as corruption, not truncation.
pub const MAX_FRAME_LEN: u64 = 1 << 30;

/// Compress `payload` and prefix it with its compressed length.
pub fn encode_frame(payload: &[u8], level: i32) -> Result<Vec<u8>, StorageError> {
    let compressed =
        zstd::encode_all(payload, level).map_err(|e| StorageError::Compression(e.to_string()))?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + compressed.len());
    frame.extend_from_slice(&(compressed.len() as u64).to_be_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

/// Serialize a record with bincode and frame it.
pub fn encode_record<T: Serialize + ?Sized>(record: &T, level: i32) -> Result<Vec<u8>, StorageError> {
    let bytes =
        bincode::serialize(record).map_err(|e| StorageError::Serialization(e.to_string()))?;
    encode_frame(&bytes, level)
}

/// Deserialize a decompressed frame payload. `offset` is only used for error reporting.
pub fn decode_record<T: DeserializeOwned>(payload: &[u8], offset: u64) -> Result<T, StorageError> {
    bincode::deserialize(payload).map_err(|e| StorageError::CorruptFrame {
        offset,
        detail: format!("undecodable record: {}", e),
    })
}

/// How a frame stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Ended exactly on a frame boundary.
    Clean,
    /// A trailing partial frame of this many bytes was ignored.
    TruncatedTail(u64),
}

/// Sequential frame reader over any byte source.
pub struct FrameReader<R> {
    inner: R,
    /// Byte offset of the next frame.
    offset: u64,
    /// Byte offset of the most recently returned frame.
    last_frame_offset: u64,
    end: Option<StreamEnd>,
    failed: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            last_frame_offset: 0,
            end: None,
            failed: false,
        }
    }

    /// Read and decompress the next frame.
    ///
    /// Returns `Ok(None)` at end-of-stream, including when the remaining
    /// bytes are shorter than the frame they declare. After a
    /// `CorruptFrame` error every further call returns `Ok(None)`.
    pub fn next_payload(&mut self) -> Result<Option<Vec<u8>>, StorageError> {
        if self.end.is_some() || self.failed {
            return Ok(None);
        }

        let frame_offset = self.offset;
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        let got = read_up_to(&mut self.inner, &mut prefix)?;
        if got == 0 {
            self.end = Some(StreamEnd::Clean);
            return Ok(None);
        }
        if got < LENGTH_PREFIX_LEN {
            self.end = Some(StreamEnd::TruncatedTail(got as u64));
            return Ok(None);
        }

        let declared = u64::from_be_bytes(prefix);
        if declared == 0 || declared > MAX_FRAME_LEN {
            self.failed = true;
            return Err(StorageError::CorruptFrame {
                offset: frame_offset,
                detail: format!("implausible frame length {}", declared),
            });
        }

        let mut compressed = Vec::new();
        let got = Read::by_ref(&mut self.inner)
            .take(declared)
            .read_to_end(&mut compressed)?;
        if (got as u64) < declared {
            self.end = Some(StreamEnd::TruncatedTail((LENGTH_PREFIX_LEN + got) as u64));
            return Ok(None);
        }
        self.offset += LENGTH_PREFIX_LEN as u64 + declared;
        self.last_frame_offset = frame_offset;

        match zstd::decode_all(compressed.as_slice()) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                self.failed = true;
                Err(StorageError::CorruptFrame {
                    offset: frame_offset,
                    detail: format!("payload does not decompress: {}", e),
                })
            }
        }
    }

    /// Byte offset where the next frame starts.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte offset of the frame most recently returned by `next_payload`.
    pub fn last_frame_offset(&self) -> u64 {
        self.last_frame_offset
    }

    /// How the stream ended, once it has.
    pub fn stream_end(&self) -> Option<StreamEnd> {
        self.end
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Reset bookkeeping after the caller repositioned the source to its start.
    pub(crate) fn reset(&mut self) {
        self.offset = 0;
        self.last_frame_offset = 0;
        self.end = None;
        self.failed = false;
    }
}

/// Fill `buf` as far as the source allows, returning the bytes read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn stream_of(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            out.extend_from_slice(&encode_frame(p, 3).unwrap());
        }
        out
    }

    #[test]
    fn test_prefix_is_big_endian_compressed_length() {
        let frame = encode_frame(b"hello hello hello hello", 3).unwrap();
        let declared = u64::from_be_bytes(frame[..8].try_into().unwrap());
        assert_eq!(declared as usize, frame.len() - LENGTH_PREFIX_LEN);
    }

    #[test]
    fn test_reads_frames_in_order() {
        let data = stream_of(&[b"first", b"second", b"third"]);
        let mut reader = FrameReader::new(Cursor::new(data));
        assert_eq!(reader.next_payload().unwrap().unwrap(), b"first");
        assert_eq!(reader.next_payload().unwrap().unwrap(), b"second");
        assert_eq!(reader.next_payload().unwrap().unwrap(), b"third");
        assert!(reader.next_payload().unwrap().is_none());
        assert_eq!(reader.stream_end(), Some(StreamEnd::Clean));
    }

    #[test]
    fn test_truncated_payload_is_end_of_stream() {
        let mut data = stream_of(&[b"complete", b"will be cut"]);
        data.truncate(data.len() - 3);
        let mut reader = FrameReader::new(Cursor::new(data));
        assert_eq!(reader.next_payload().unwrap().unwrap(), b"complete");
        assert!(reader.next_payload().unwrap().is_none());
        assert!(matches!(reader.stream_end(), Some(StreamEnd::TruncatedTail(_))));
    }

    #[test]
    fn test_short_prefix_is_end_of_stream() {
        let mut data = stream_of(&[b"only"]);
        data.extend_from_slice(&[0, 0, 0]);
        let mut reader = FrameReader::new(Cursor::new(data));
        assert!(reader.next_payload().unwrap().is_some());
        assert!(reader.next_payload().unwrap().is_none());
        assert_eq!(reader.stream_end(), Some(StreamEnd::TruncatedTail(3)));
    }

    #[test]
    fn test_garbage_payload_is_corrupt() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u64.to_be_bytes());
        data.extend_from_slice(b"nope!");
        let mut reader = FrameReader::new(Cursor::new(data));
        match reader.next_payload() {
            Err(StorageError::CorruptFrame { offset, .. }) => assert_eq!(offset, 0),
            other => panic!("Expected CorruptFrame, got {:?}", other),
        }
        // Reading stops at the corruption
        assert!(reader.next_payload().unwrap().is_none());
    }

    #[test]
    fn test_zero_length_is_corrupt() {
        let mut data = stream_of(&[b"ok"]);
        let second_offset = data.len() as u64;
        data.extend_from_slice(&0u64.to_be_bytes());
        let mut reader = FrameReader::new(Cursor::new(data));
        reader.next_payload().unwrap();
        match reader.next_payload() {
            Err(StorageError::CorruptFrame { offset, .. }) => assert_eq!(offset, second_offset),
            other => panic!("Expected CorruptFrame, got {:?}", other),
        }
    }

    #[test]
    fn test_record_helpers() {
        let record: Vec<(u32, String)> = vec![(1, "a".into()), (2, "b".into())];
        let frame = encode_record(&record, 3).unwrap();
        let mut reader = FrameReader::new(Cursor::new(frame));
        let payload = reader.next_payload().unwrap().unwrap();
        let back: Vec<(u32, String)> = decode_record(&payload, 0).unwrap();
        assert_eq!(back, record);
    }

    proptest! {
        #[test]
        fn prop_any_truncation_yields_a_clean_prefix(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 1..6),
            cut in any::<prop::sample::Index>(),
        ) {
            let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
            let data = stream_of(&refs);
            let keep = cut.index(data.len() + 1);
            let mut reader = FrameReader::new(Cursor::new(data[..keep].to_vec()));

            let mut read = Vec::new();
            while let Some(p) = reader.next_payload().unwrap() {
                read.push(p);
            }
            prop_assert!(read.len() <= payloads.len());
            prop_assert_eq!(&read[..], &payloads[..read.len()]);
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut reader = FrameReader::new(Cursor::new(data));
            for _ in 0..64 {
                match reader.next_payload() {
                    Ok(Some(_)) => continue,
                    _ => break,
                }
            }
        }
    }
}
