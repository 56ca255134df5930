//! RLP decoding, just enough to walk trie nodes and accounts.

use thiserror::Error;

/// RLP decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RlpError {
    #[error("input ends before the item does")]
    UnexpectedEnd,
    #[error("{0} trailing bytes after the item")]
    TrailingBytes(usize),
    #[error("expected a list")]
    ExpectedList,
    #[error("expected a byte string")]
    ExpectedBytes,
    #[error("length prefix does not fit in usize")]
    Overflow,
    #[error("embedded node of {0} bytes is not shorter than a hash")]
    OversizedEmbed(usize),
}

/// Kind of an RLP item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Bytes,
    List,
}

/// A decoded RLP item borrowing from the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlpItem<'a> {
    pub kind: ItemKind,
    /// The item's content without its header.
    pub payload: &'a [u8],
    /// The full encoding of the item, header included.
    pub raw: &'a [u8],
}

impl<'a> RlpItem<'a> {
    /// Decodes exactly one item spanning all of `data`.
    pub fn decode(data: &'a [u8]) -> Result<Self, RlpError> {
        let (item, rest) = Self::decode_prefix(data)?;
        if !rest.is_empty() {
            return Err(RlpError::TrailingBytes(rest.len()));
        }
        Ok(item)
    }

    /// Decodes the first item of `data`, returning it and the remainder.
    pub fn decode_prefix(data: &'a [u8]) -> Result<(Self, &'a [u8]), RlpError> {
        let first = *data.first().ok_or(RlpError::UnexpectedEnd)?;
        let (kind, header, len) = match first {
            0x00..=0x7f => (ItemKind::Bytes, 0, 1),
            0x80..=0xb7 => (ItemKind::Bytes, 1, (first - 0x80) as usize),
            0xb8..=0xbf => {
                let len_len = (first - 0xb7) as usize;
                (ItemKind::Bytes, 1 + len_len, read_len(&data[1..], len_len)?)
            }
            0xc0..=0xf7 => (ItemKind::List, 1, (first - 0xc0) as usize),
            0xf8..=0xff => {
                let len_len = (first - 0xf7) as usize;
                (ItemKind::List, 1 + len_len, read_len(&data[1..], len_len)?)
            }
        };

        let end = header.checked_add(len).ok_or(RlpError::Overflow)?;
        if end > data.len() {
            return Err(RlpError::UnexpectedEnd);
        }
        let payload = if header == 0 { &data[..1] } else { &data[header..end] };
        let item = RlpItem {
            kind,
            payload,
            raw: &data[..end],
        };
        Ok((item, &data[end..]))
    }

    /// Returns true for lists.
    pub fn is_list(&self) -> bool {
        self.kind == ItemKind::List
    }

    /// The byte string content.
    pub fn bytes(&self) -> Result<&'a [u8], RlpError> {
        match self.kind {
            ItemKind::Bytes => Ok(self.payload),
            ItemKind::List => Err(RlpError::ExpectedBytes),
        }
    }

    /// The items of a list.
    pub fn items(&self) -> Result<Vec<RlpItem<'a>>, RlpError> {
        if self.kind != ItemKind::List {
            return Err(RlpError::ExpectedList);
        }
        let mut items = Vec::new();
        let mut rest = self.payload;
        while !rest.is_empty() {
            let (item, next) = Self::decode_prefix(rest)?;
            items.push(item);
            rest = next;
        }
        Ok(items)
    }

    /// Decodes a big-endian unsigned integer of at most 8 bytes.
    pub fn as_u64(&self) -> Result<u64, RlpError> {
        let bytes = self.bytes()?;
        if bytes.len() > 8 {
            return Err(RlpError::Overflow);
        }
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }
}

fn read_len(data: &[u8], len_len: usize) -> Result<usize, RlpError> {
    if len_len > std::mem::size_of::<usize>() {
        return Err(RlpError::Overflow);
    }
    let bytes = data.get(..len_len).ok_or(RlpError::UnexpectedEnd)?;
    Ok(bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::RlpEncoder;

    #[test]
    fn test_decode_single_byte_and_string() {
        let item = RlpItem::decode(&[0x7f]).unwrap();
        assert_eq!(item.bytes().unwrap(), &[0x7f]);

        let item = RlpItem::decode(&[0x83, b'd', b'o', b'g']).unwrap();
        assert_eq!(item.bytes().unwrap(), b"dog");
        assert_eq!(item.raw.len(), 4);
    }

    #[test]
    fn test_decode_long_string() {
        let mut enc = RlpEncoder::new();
        enc.encode_bytes(&[0xaa; 100]);
        let encoded = enc.into_bytes();
        let item = RlpItem::decode(&encoded).unwrap();
        assert_eq!(item.bytes().unwrap(), &[0xaa; 100][..]);
    }

    #[test]
    fn test_decode_list() {
        let data = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let item = RlpItem::decode(&data).unwrap();
        let items = item.items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].bytes().unwrap(), b"cat");
        assert_eq!(items[1].raw, &[0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(RlpItem::decode(&[]), Err(RlpError::UnexpectedEnd));
        assert_eq!(RlpItem::decode(&[0x83, 1]), Err(RlpError::UnexpectedEnd));
        assert_eq!(RlpItem::decode(&[0x01, 0x02]), Err(RlpError::TrailingBytes(1)));
        assert_eq!(
            RlpItem::decode(&[0x01]).unwrap().items(),
            Err(RlpError::ExpectedList)
        );
    }

    #[test]
    fn test_as_u64() {
        let mut enc = RlpEncoder::new();
        enc.encode_u64(0x1234_5678);
        let encoded = enc.into_bytes();
        assert_eq!(RlpItem::decode(&encoded).unwrap().as_u64().unwrap(), 0x1234_5678);
        assert_eq!(RlpItem::decode(&[0x80]).unwrap().as_u64().unwrap(), 0);
    }
}
