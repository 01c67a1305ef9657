//! Accounts and their storage-compatible compact encoding.

use crate::{DecodingError, EMPTY_HASH};
use alloy_primitives::{B256, U256};
use alloy_rlp::Encodable;
use serde::{Deserialize, Serialize};

/// First incarnation of a contract account. Contracts destructed and then
/// re-created get a higher incarnation; externally owned accounts stay at 0.
pub const DEFAULT_INCARNATION: u64 = 1;

/// An account record of the plain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Balance in wei.
    pub balance: U256,
    /// Keccak-256 of the account's code.
    pub code_hash: B256,
    /// Self-destruct generation counter.
    pub incarnation: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self { nonce: 0, balance: U256::ZERO, code_hash: EMPTY_HASH, incarnation: 0 }
    }
}

const FIELD_NONCE: u8 = 1;
const FIELD_BALANCE: u8 = 2;
const FIELD_INCARNATION: u8 = 4;
const FIELD_CODE_HASH: u8 = 8;

fn minimal_be(value: u64) -> ([u8; 8], usize) {
    let bytes = value.to_be_bytes();
    let len = (8 - value.leading_zeros() as usize / 8).max(0);
    (bytes, len)
}

impl Account {
    /// Encodes the account in the storage-compatible compact form: a
    /// fieldset byte followed by length-prefixed minimal big-endian fields.
    pub fn encode_for_storage(&self, omit_code_hash: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoding_length_for_storage());
        let mut fieldset = 0u8;
        out.push(0); // fieldset placeholder

        if self.nonce != 0 {
            fieldset |= FIELD_NONCE;
            let (bytes, len) = minimal_be(self.nonce);
            out.push(len as u8);
            out.extend_from_slice(&bytes[8 - len..]);
        }
        if !self.balance.is_zero() {
            fieldset |= FIELD_BALANCE;
            let bytes = self.balance.to_be_bytes::<32>();
            let len = 32 - self.balance.leading_zeros() / 8;
            out.push(len as u8);
            out.extend_from_slice(&bytes[32 - len..]);
        }
        if self.incarnation != 0 {
            fieldset |= FIELD_INCARNATION;
            let (bytes, len) = minimal_be(self.incarnation);
            out.push(len as u8);
            out.extend_from_slice(&bytes[8 - len..]);
        }
        if self.code_hash != EMPTY_HASH && !omit_code_hash {
            fieldset |= FIELD_CODE_HASH;
            out.push(32);
            out.extend_from_slice(self.code_hash.as_slice());
        }

        out[0] = fieldset;
        out
    }

    /// Length of [`Self::encode_for_storage`] without materializing it.
    pub fn encoding_length_for_storage(&self) -> usize {
        let mut len = 1;
        if self.nonce != 0 {
            len += 1 + minimal_be(self.nonce).1;
        }
        if !self.balance.is_zero() {
            len += 1 + (32 - self.balance.leading_zeros() / 8);
        }
        if self.incarnation != 0 {
            len += 1 + minimal_be(self.incarnation).1;
        }
        if self.code_hash != EMPTY_HASH {
            len += 1 + 32;
        }
        len
    }

    /// Decodes an account from its storage encoding.
    pub fn from_encoded_storage(payload: &[u8]) -> Result<Self, DecodingError> {
        let mut account = Self::default();
        let Some((&fieldset, mut rest)) = payload.split_first() else {
            // the empty payload decodes to the empty account
            return Ok(account);
        };
        if fieldset > (FIELD_NONCE | FIELD_BALANCE | FIELD_INCARNATION | FIELD_CODE_HASH) {
            return Err(DecodingError::InvalidFieldset);
        }

        if fieldset & FIELD_NONCE != 0 {
            account.nonce = be_to_u64(take_field(&mut rest, 8)?);
        }
        if fieldset & FIELD_BALANCE != 0 {
            account.balance = U256::from_be_slice(take_field(&mut rest, 32)?);
        }
        if fieldset & FIELD_INCARNATION != 0 {
            account.incarnation = be_to_u64(take_field(&mut rest, 8)?);
        }
        if fieldset & FIELD_CODE_HASH != 0 {
            let field = take_field(&mut rest, 32)?;
            if field.len() != 32 {
                return Err(DecodingError::UnexpectedLength);
            }
            account.code_hash = B256::from_slice(field);
        }
        Ok(account)
    }

    /// Extracts only the incarnation from a storage encoding; cheaper than
    /// a full decode when nothing else is needed.
    pub fn incarnation_from_encoded_storage(payload: &[u8]) -> Result<u64, DecodingError> {
        let Some((&fieldset, mut rest)) = payload.split_first() else {
            return Ok(0);
        };
        if fieldset & FIELD_INCARNATION == 0 {
            return Ok(0);
        }
        // skip nonce and balance fields
        for field in [FIELD_NONCE, FIELD_BALANCE] {
            if fieldset & field != 0 {
                let (&len, tail) = rest.split_first().ok_or(DecodingError::InputTooShort)?;
                if tail.len() < len as usize {
                    return Err(DecodingError::InputTooShort);
                }
                rest = &tail[len as usize..];
            }
        }
        let (&len, tail) = rest.split_first().ok_or(DecodingError::InputTooShort)?;
        if len as usize > 8 {
            return Err(DecodingError::UnexpectedLength);
        }
        if tail.len() < len as usize {
            return Err(DecodingError::InputTooShort);
        }
        Ok(be_to_u64(&tail[..len as usize]))
    }

    /// RLP of the account as it appears in a state-trie leaf.
    pub fn rlp(&self, storage_root: B256) -> Vec<u8> {
        #[derive(alloy_rlp::RlpEncodable)]
        struct TrieAccount {
            nonce: u64,
            balance: U256,
            storage_root: B256,
            code_hash: B256,
        }
        let account = TrieAccount {
            nonce: self.nonce,
            balance: self.balance,
            storage_root,
            code_hash: self.code_hash,
        };
        let mut out = Vec::with_capacity(account.length());
        account.encode(&mut out);
        out
    }
}

/// Reads one length-prefixed field off the front of `rest`.
fn take_field<'a>(rest: &mut &'a [u8], max_len: usize) -> Result<&'a [u8], DecodingError> {
    let (&len, tail) = rest.split_first().ok_or(DecodingError::InputTooShort)?;
    let len = len as usize;
    if len > max_len {
        return Err(DecodingError::UnexpectedLength);
    }
    if tail.len() < len {
        return Err(DecodingError::InputTooShort);
    }
    let (field, tail) = tail.split_at(len);
    *rest = tail;
    Ok(field)
}

fn be_to_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}
