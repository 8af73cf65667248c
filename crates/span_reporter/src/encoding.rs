//! Message framing and span encoders.
//!
//! A message is a list of encoded spans wrapped in an envelope that depends
//! on the wire encoding. The batch assembler needs the exact framed size up
//! front so that no message ever exceeds `message_max_bytes`.

use crate::error::EncodeError;
use crate::record::Record;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Thrift list header: element type (struct = 12) followed by an i32 count.
const THRIFT_LIST_HEADER: usize = 5;
const THRIFT_STRUCT_TYPE: u8 = 12;

/// How encoded spans are framed into one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// `[span1,span2]`
    Json,
    /// Repeated `ListOfSpans.spans` fields; each record is already a field.
    Proto3,
    /// Thrift list of structs.
    Thrift,
}

impl Encoding {
    /// Fixed envelope bytes paid once per message.
    #[inline]
    pub const fn framing_overhead(self) -> usize {
        match self {
            Self::Json => 2,
            Self::Proto3 => 0,
            Self::Thrift => THRIFT_LIST_HEADER,
        }
    }

    /// Bytes added between two consecutive records.
    #[inline]
    pub const fn separator_bytes(self) -> usize {
        match self {
            Self::Json => 1,
            Self::Proto3 | Self::Thrift => 0,
        }
    }

    /// Framed size of a message holding records of the given lengths.
    pub fn list_size_in_bytes<I>(self, record_lengths: I) -> usize
    where
        I: IntoIterator<Item = usize>,
    {
        let mut count = 0usize;
        let mut total = 0usize;
        for len in record_lengths {
            count += 1;
            total += len;
        }
        total + self.framing_overhead() + count.saturating_sub(1) * self.separator_bytes()
    }

    /// Size a message grows by when `record_len` is appended to a list that
    /// already holds `current_count` records.
    #[inline]
    pub const fn append_cost(self, current_count: usize, record_len: usize) -> usize {
        if current_count == 0 {
            record_len
        } else {
            record_len + self.separator_bytes()
        }
    }

    /// Frames `records` into a single message payload.
    pub fn encode_list(self, records: &[Record]) -> Bytes {
        let size = self.list_size_in_bytes(records.iter().map(Record::len));
        let mut buf = BytesMut::with_capacity(size);
        match self {
            Self::Json => {
                buf.put_u8(b'[');
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        buf.put_u8(b',');
                    }
                    buf.put_slice(record.as_bytes());
                }
                buf.put_u8(b']');
            }
            Self::Proto3 => {
                for record in records {
                    buf.put_slice(record.as_bytes());
                }
            }
            Self::Thrift => {
                buf.put_u8(THRIFT_STRUCT_TYPE);
                buf.put_i32(records.len() as i32);
                for record in records {
                    buf.put_slice(record.as_bytes());
                }
            }
        }
        debug_assert_eq!(buf.len(), size, "framed size disagrees with list_size_in_bytes");
        buf.freeze()
    }
}

/// Produces records in one wire encoding.
pub trait Encoder: Send + Sync {
    /// The wire encoding the produced records belong to.
    fn encoding(&self) -> Encoding;
}

/// Turns a span of type `S` into an encoded [`Record`].
pub trait Encode<S: ?Sized>: Encoder {
    fn encode(&self, span: &S) -> Result<Record, EncodeError>;

    /// Encoded size of `span`. The default encodes and measures.
    fn size_in_bytes(&self, span: &S) -> Result<usize, EncodeError> {
        self.encode(span).map(|r| r.len())
    }
}

/// Encodes any `Serialize` span as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encoding(&self) -> Encoding {
        Encoding::Json
    }
}

impl<S: Serialize + ?Sized> Encode<S> for JsonEncoder {
    fn encode(&self, span: &S) -> Result<Record, EncodeError> {
        Ok(Record::from(serde_json::to_vec(span)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(payloads: &[&'static str]) -> Vec<Record> {
        payloads.iter().map(|p| Record::from(p.to_string())).collect()
    }

    #[test]
    fn test_json_framing() {
        let list = records(&["{\"a\":1}", "{\"b\":2}"]);
        let payload = Encoding::Json.encode_list(&list);
        assert_eq!(&payload[..], b"[{\"a\":1},{\"b\":2}]");
        assert_eq!(
            Encoding::Json.list_size_in_bytes(list.iter().map(Record::len)),
            payload.len()
        );
    }

    #[test]
    fn test_empty_json_list() {
        assert_eq!(&Encoding::Json.encode_list(&[])[..], b"[]");
        assert_eq!(Encoding::Json.list_size_in_bytes(std::iter::empty()), 2);
    }

    #[test]
    fn test_proto3_is_concatenation() {
        let list = records(&["ab", "cde"]);
        assert_eq!(&Encoding::Proto3.encode_list(&list)[..], b"abcde");
        assert_eq!(Encoding::Proto3.framing_overhead(), 0);
    }

    #[test]
    fn test_thrift_list_header() {
        let list = records(&["xy", "z"]);
        let payload = Encoding::Thrift.encode_list(&list);
        assert_eq!(&payload[..5], &[12, 0, 0, 0, 2]);
        assert_eq!(&payload[5..], b"xyz");
    }

    #[test]
    fn test_append_cost_matches_list_size() {
        for encoding in [Encoding::Json, Encoding::Proto3, Encoding::Thrift] {
            let mut size = encoding.framing_overhead();
            let lengths = [10, 20, 30];
            for (i, len) in lengths.iter().enumerate() {
                size += encoding.append_cost(i, *len);
            }
            assert_eq!(size, encoding.list_size_in_bytes(lengths));
        }
    }

    #[test]
    fn test_json_encoder() {
        #[derive(Serialize)]
        struct Tiny {
            id: u8,
        }
        let record = JsonEncoder.encode(&Tiny { id: 3 }).unwrap();
        assert_eq!(record.as_bytes(), b"{\"id\":3}");
        assert_eq!(JsonEncoder.size_in_bytes(&Tiny { id: 3 }).unwrap(), 8);
        assert_eq!(JsonEncoder.encoding(), Encoding::Json);
    }
}
