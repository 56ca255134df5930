//! RLP writer used to build node and account encodings.

/// Appends RLP items to a growing buffer.
#[derive(Clone, Debug, Default)]
pub struct RlpEncoder {
    buffer: Vec<u8>,
}

impl RlpEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes `bytes` as an RLP string.
    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        match bytes {
            [b] if *b < 0x80 => self.buffer.push(*b),
            _ => {
                self.write_header(0x80, bytes.len());
                self.buffer.extend_from_slice(bytes);
            }
        }
    }

    /// Writes the empty string, which also stands for an empty child slot.
    pub fn encode_empty(&mut self) {
        self.buffer.push(0x80);
    }

    /// Writes an already encoded item verbatim.
    pub fn append_raw(&mut self, raw: &[u8]) {
        self.buffer.extend_from_slice(raw);
    }

    /// Writes a list whose items are produced by `items`.
    pub fn encode_list<F>(&mut self, items: F)
    where
        F: FnOnce(&mut Self),
    {
        let mut inner = RlpEncoder::new();
        items(&mut inner);
        self.write_header(0xc0, inner.buffer.len());
        self.buffer.extend_from_slice(&inner.buffer);
    }

    /// Writes an integer as a big-endian string without leading zeros.
    pub fn encode_u64(&mut self, value: u64) {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        self.encode_bytes(&bytes[first..]);
    }

    /// Writes a nibble path in hex-prefix form. The flag nibble is 2 for
    /// leaves and 0 for extensions, plus 1 when the path length is odd.
    pub fn encode_nibbles(&mut self, nibbles: &[u8], is_leaf: bool) {
        let odd = nibbles.len() % 2 == 1;
        let flag = (u8::from(is_leaf) << 1) | u8::from(odd);

        let mut packed = Vec::with_capacity(nibbles.len() / 2 + 1);
        let rest = if odd {
            packed.push((flag << 4) | (nibbles[0] & 0x0f));
            &nibbles[1..]
        } else {
            packed.push(flag << 4);
            nibbles
        };
        packed.extend(rest.chunks(2).map(|pair| (pair[0] << 4) | (pair[1] & 0x0f)));
        self.encode_bytes(&packed);
    }

    fn write_header(&mut self, offset: u8, len: usize) {
        if len < 56 {
            self.buffer.push(offset + len as u8);
            return;
        }
        let be = (len as u64).to_be_bytes();
        let first = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
        let len_bytes = &be[first..];
        self.buffer.push(offset + 55 + len_bytes.len() as u8);
        self.buffer.extend_from_slice(len_bytes);
    }
}
