//! Account leaves of the state trie.

use primitive_types::{H256, U256};

use super::node::{EMPTY_CODE_HASH, EMPTY_ROOT, HASH_SIZE};
use super::rlp_decode::{RlpError, RlpItem};
use super::rlp_encode::RlpEncoder;

/// An account as stored in a leaf of the account trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Account nonce.
    pub nonce: u64,
    /// Account balance.
    pub balance: U256,
    /// Root of the account's storage trie.
    pub storage_root: H256,
    /// Keccak of the account's code.
    pub code_hash: H256,
}

impl Account {
    /// Creates an empty account.
    pub fn empty() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: EMPTY_ROOT,
            code_hash: EMPTY_CODE_HASH,
        }
    }

    /// Creates an empty account with the given storage root.
    pub fn with_storage_root(storage_root: H256) -> Self {
        Self {
            storage_root,
            ..Self::empty()
        }
    }

    /// RLP encodes the account: `[nonce, balance, storage_root, code_hash]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = RlpEncoder::with_capacity(80);
        enc.encode_list(|e| {
            e.encode_u64(self.nonce);
            let balance = self.balance.to_big_endian();
            let first = balance.iter().position(|&b| b != 0).unwrap_or(balance.len());
            e.encode_bytes(&balance[first..]);
            e.encode_bytes(self.storage_root.as_bytes());
            e.encode_bytes(self.code_hash.as_bytes());
        });
        enc.into_bytes()
    }

    /// Decodes an RLP encoded account.
    pub fn decode(data: &[u8]) -> Result<Self, RlpError> {
        let items = RlpItem::decode(data)?.items()?;
        let [nonce, balance, storage_root, code_hash] = items.as_slice() else {
            return Err(RlpError::ExpectedList);
        };

        let balance = balance.bytes()?;
        if balance.len() > 32 {
            return Err(RlpError::Overflow);
        }
        Ok(Self {
            nonce: nonce.as_u64()?,
            balance: U256::from_big_endian(balance),
            storage_root: hash_item(storage_root)?,
            code_hash: hash_item(code_hash)?,
        })
    }
}

fn hash_item(item: &RlpItem<'_>) -> Result<H256, RlpError> {
    let bytes = item.bytes()?;
    if bytes.len() != HASH_SIZE {
        return Err(RlpError::ExpectedBytes);
    }
    Ok(H256::from_slice(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_encode_decode() {
        let account = Account {
            nonce: 7,
            balance: U256::from(1_000_000u64),
            storage_root: H256::repeat_byte(0x11),
            code_hash: EMPTY_CODE_HASH,
        };
        let encoded = account.encode();
        assert_eq!(Account::decode(&encoded).unwrap(), account);
    }

    #[test]
    fn test_empty_account_encoding() {
        let encoded = Account::empty().encode();
        // 0x80 nonce, 0x80 balance, two 33-byte hashes.
        assert_eq!(encoded.len(), 2 + 1 + 1 + 33 + 33);
        assert_eq!(&encoded[2..4], &[0x80, 0x80]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Account::decode(&[0xc2, 0x01, 0x02]).is_err());
        assert!(Account::decode(b"not rlp at all").is_err());
    }
}
