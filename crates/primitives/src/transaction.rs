//! The three transaction kinds and their EIP-2718 envelopes.

use crate::DecodingError;
use alloy_primitives::{keccak256, uint, Address, Bytes, Signature, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

/// Order of the secp256k1 group.
const SECP256K1N: U256 =
    uint!(0xfffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141_U256);

/// Half the order of the secp256k1 group; the low-s bound of EIP-2.
const SECP256K1N_HALF: U256 =
    uint!(0x7fffffffffffffffffffffffffffffff5d576e7357a4501ddfe92f46681b20a0_U256);

/// EIP-2718 transaction type.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TxType {
    /// Untyped pre-Berlin transaction.
    #[default]
    Legacy = 0,
    /// EIP-2930 access-list transaction.
    Eip2930 = 1,
    /// EIP-1559 dynamic-fee transaction.
    Eip1559 = 2,
}

/// One EIP-2930 access-list entry.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct AccessListEntry {
    /// Account the transaction plans to touch.
    pub account: Address,
    /// Storage keys the transaction plans to touch.
    pub storage_keys: Vec<B256>,
}

/// How typed transactions are framed inside an RLP payload.
///
/// Per EIP-2718 a typed transaction starts with its type byte; inside block
/// bodies it is additionally wrapped as an RLP byte string. Decoders accept
/// one or both framings as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eip2718Wrapping {
    /// The payload must start with the raw type byte.
    None,
    /// The payload must be an RLP string containing the typed transaction.
    String,
    /// Both framings are accepted.
    Both,
}

/// A signed transaction of any supported type.
///
/// For legacy and EIP-2930 transactions `max_priority_fee_per_gas` and
/// `max_fee_per_gas` both hold the gas price.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// EIP-2718 type.
    pub tx_type: TxType,
    /// Sender nonce.
    pub nonce: u64,
    /// EIP-1559 priority fee cap (gas price for earlier types).
    pub max_priority_fee_per_gas: U256,
    /// EIP-1559 fee cap (gas price for earlier types).
    pub max_fee_per_gas: U256,
    /// Gas limit of the transaction.
    pub gas_limit: u64,
    /// Recipient; absent for contract creation.
    pub to: Option<Address>,
    /// Wei transferred to the recipient.
    pub value: U256,
    /// Call data or init code.
    pub data: Bytes,
    /// Y-parity of the signature.
    pub odd_y_parity: bool,
    /// EIP-155 chain id, if the signature commits to one.
    pub chain_id: Option<u64>,
    /// Signature r.
    pub r: U256,
    /// Signature s.
    pub s: U256,
    /// EIP-2930 access list.
    pub access_list: Vec<AccessListEntry>,
    /// Sender recovered from the signature, if already computed.
    pub from: Option<Address>,
}

/// Returns whether `(r, s)` is an acceptable secp256k1 signature; from
/// Homestead onward the high-s half of the group is rejected.
pub fn is_valid_signature(r: U256, s: U256, homestead: bool) -> bool {
    if r.is_zero() || s.is_zero() || r >= SECP256K1N || s >= SECP256K1N {
        return false;
    }
    // EIP-2: reject malleable signatures
    !(homestead && s > SECP256K1N_HALF)
}

impl Transaction {
    /// The EIP-155 `v` value of the signature.
    pub fn v(&self) -> U256 {
        let parity = U256::from(self.odd_y_parity as u64);
        match (self.tx_type, self.chain_id) {
            (TxType::Legacy, Some(chain_id)) => {
                U256::from(chain_id) * U256::from(2u64) + U256::from(35u64) + parity
            }
            (TxType::Legacy, None) => U256::from(27u64) + parity,
            _ => parity,
        }
    }

    /// Splits a legacy `v` into parity and chain id; `false` if `v` is not
    /// 27, 28, nor a valid EIP-155 value.
    pub fn set_v(&mut self, v: U256) -> bool {
        if v == U256::from(27u64) || v == U256::from(28u64) {
            self.odd_y_parity = v == U256::from(28u64);
            self.chain_id = None;
            return true;
        }
        if v < U256::from(35u64) {
            return false;
        }
        let w = v - U256::from(35u64);
        let chain_id = w >> 1;
        if chain_id > U256::from(u64::MAX) {
            return false;
        }
        self.odd_y_parity = w.bit(0);
        self.chain_id = Some(chain_id.to::<u64>());
        true
    }

    /// Hash committed to by the signature.
    pub fn signing_hash(&self) -> B256 {
        let mut encoded = Vec::new();
        self.encode_with(&mut encoded, true, false);
        keccak256(&encoded)
    }

    /// Keccak-256 of the EIP-2718 canonical encoding (type byte prefix,
    /// no string wrapping); the transaction hash.
    pub fn hash(&self) -> B256 {
        let mut encoded = Vec::new();
        self.encode_with(&mut encoded, false, false);
        keccak256(&encoded)
    }

    /// Recovers the sender address from the signature, or `None` when the
    /// signature does not resolve to a point.
    pub fn recover_sender(&self) -> Option<Address> {
        Signature::new(self.r, self.s, self.odd_y_parity)
            .recover_address_from_prehash(&self.signing_hash())
            .ok()
    }

    /// EIP-1559 priority fee actually received by the producer.
    ///
    /// Callers must have validated `max_fee_per_gas >= base_fee_per_gas`.
    pub fn priority_fee_per_gas(&self, base_fee_per_gas: U256) -> U256 {
        core::cmp::min(self.max_priority_fee_per_gas, self.max_fee_per_gas - base_fee_per_gas)
    }

    /// Gas price effectively paid by the sender.
    pub fn effective_gas_price(&self, base_fee_per_gas: U256) -> U256 {
        self.priority_fee_per_gas(base_fee_per_gas) + base_fee_per_gas
    }

    fn fields_payload_length(&self, for_signing: bool) -> usize {
        let to_len = self.to.map_or(1, |to| to.length());
        let mut len = self.nonce.length()
            + self.gas_limit.length()
            + to_len
            + self.value.length()
            + self.data.length();
        match self.tx_type {
            TxType::Legacy => {
                len += self.max_fee_per_gas.length();
                if for_signing {
                    if let Some(chain_id) = self.chain_id {
                        // EIP-155: (chain_id, 0, 0) trailer
                        len += chain_id.length() + 2;
                    }
                } else {
                    len += self.v().length() + self.r.length() + self.s.length();
                }
            }
            TxType::Eip2930 => {
                len += self.chain_id.unwrap_or_default().length()
                    + self.max_fee_per_gas.length()
                    + self.access_list.length();
                if !for_signing {
                    len += self.odd_y_parity.length() + self.r.length() + self.s.length();
                }
            }
            TxType::Eip1559 => {
                len += self.chain_id.unwrap_or_default().length()
                    + self.max_priority_fee_per_gas.length()
                    + self.max_fee_per_gas.length()
                    + self.access_list.length();
                if !for_signing {
                    len += self.odd_y_parity.length() + self.r.length() + self.s.length();
                }
            }
        }
        len
    }

    fn encode_to(&self, out: &mut Vec<u8>, for_signing: bool) {
        let payload_length = self.fields_payload_length(for_signing);
        if self.tx_type != TxType::Legacy {
            out.push(self.tx_type as u8);
        }
        alloy_rlp::Header { list: true, payload_length }.encode(out);
        match self.tx_type {
            TxType::Legacy => {
                self.nonce.encode(out);
                self.max_fee_per_gas.encode(out);
                self.gas_limit.encode(out);
                encode_to_field(&self.to, out);
                self.value.encode(out);
                self.data.encode(out);
                if for_signing {
                    if let Some(chain_id) = self.chain_id {
                        chain_id.encode(out);
                        0u8.encode(out);
                        0u8.encode(out);
                    }
                } else {
                    self.v().encode(out);
                    self.r.encode(out);
                    self.s.encode(out);
                }
            }
            TxType::Eip2930 => {
                self.chain_id.unwrap_or_default().encode(out);
                self.nonce.encode(out);
                self.max_fee_per_gas.encode(out);
                self.gas_limit.encode(out);
                encode_to_field(&self.to, out);
                self.value.encode(out);
                self.data.encode(out);
                self.access_list.encode(out);
                if !for_signing {
                    self.odd_y_parity.encode(out);
                    self.r.encode(out);
                    self.s.encode(out);
                }
            }
            TxType::Eip1559 => {
                self.chain_id.unwrap_or_default().encode(out);
                self.nonce.encode(out);
                self.max_priority_fee_per_gas.encode(out);
                self.max_fee_per_gas.encode(out);
                self.gas_limit.encode(out);
                encode_to_field(&self.to, out);
                self.value.encode(out);
                self.data.encode(out);
                self.access_list.encode(out);
                if !for_signing {
                    self.odd_y_parity.encode(out);
                    self.r.encode(out);
                    self.s.encode(out);
                }
            }
        }
    }

    /// Encodes the transaction.
    ///
    /// `for_signing` drops the signature (and, for EIP-155 legacy
    /// transactions, appends the `(chain_id, 0, 0)` trailer);
    /// `wrap_eip2718_into_string` additionally frames typed transactions as
    /// an RLP string, as block bodies require.
    pub fn encode_with(
        &self,
        out: &mut Vec<u8>,
        for_signing: bool,
        wrap_eip2718_into_string: bool,
    ) {
        if self.tx_type == TxType::Legacy || for_signing || !wrap_eip2718_into_string {
            self.encode_to(out, for_signing);
            return;
        }
        let mut inner = Vec::new();
        self.encode_to(&mut inner, for_signing);
        alloy_rlp::Header { list: false, payload_length: inner.len() }.encode(out);
        out.extend_from_slice(&inner);
    }
}

fn encode_to_field(to: &Option<Address>, out: &mut Vec<u8>) {
    match to {
        Some(to) => to.encode(out),
        None => out.push(alloy_rlp::EMPTY_STRING_CODE),
    }
}

fn decode_to_field(buf: &mut &[u8]) -> Result<Option<Address>, DecodingError> {
    if buf.first() == Some(&alloy_rlp::EMPTY_STRING_CODE) {
        *buf = &buf[1..];
        Ok(None)
    } else {
        Ok(Some(Address::decode(buf)?))
    }
}

/// Decodes a transaction, accepting the configured EIP-2718 framings.
pub fn decode_transaction(
    buf: &mut &[u8],
    wrapping: Eip2718Wrapping,
) -> Result<Transaction, DecodingError> {
    let first = *buf.first().ok_or(DecodingError::InputTooShort)?;
    if first >= alloy_rlp::EMPTY_LIST_CODE {
        return decode_legacy(buf);
    }
    if first < alloy_rlp::EMPTY_STRING_CODE {
        // raw type byte
        if wrapping == Eip2718Wrapping::String {
            return Err(DecodingError::UnexpectedEip2718Serialization);
        }
        return decode_typed(buf);
    }
    // string-wrapped typed transaction
    if wrapping == Eip2718Wrapping::None {
        return Err(DecodingError::UnexpectedEip2718Serialization);
    }
    let rlp_head = alloy_rlp::Header::decode(buf)?;
    if rlp_head.list {
        return Err(DecodingError::UnexpectedList);
    }
    if buf.len() < rlp_head.payload_length {
        return Err(DecodingError::InputTooShort);
    }
    let (payload, rest) = buf.split_at(rlp_head.payload_length);
    let mut payload = payload;
    let txn = decode_typed(&mut payload)?;
    if !payload.is_empty() {
        return Err(DecodingError::ListLengthMismatch);
    }
    *buf = rest;
    Ok(txn)
}

fn decode_typed(buf: &mut &[u8]) -> Result<Transaction, DecodingError> {
    let tx_type = match buf.first() {
        Some(1) => TxType::Eip2930,
        Some(2) => TxType::Eip1559,
        Some(_) => return Err(DecodingError::UnsupportedTransactionType),
        None => return Err(DecodingError::InputTooShort),
    };
    *buf = &buf[1..];

    let rlp_head = alloy_rlp::Header::decode(buf)?;
    if !rlp_head.list {
        return Err(DecodingError::UnexpectedString);
    }
    let started_len = buf.len();

    let mut txn = Transaction { tx_type, ..Default::default() };
    txn.chain_id = Some(u64::decode(buf)?);
    txn.nonce = u64::decode(buf)?;
    match tx_type {
        TxType::Eip2930 => {
            txn.max_fee_per_gas = U256::decode(buf)?;
            txn.max_priority_fee_per_gas = txn.max_fee_per_gas;
        }
        TxType::Eip1559 => {
            txn.max_priority_fee_per_gas = U256::decode(buf)?;
            txn.max_fee_per_gas = U256::decode(buf)?;
        }
        TxType::Legacy => unreachable!("typed decoder"),
    }
    txn.gas_limit = u64::decode(buf)?;
    txn.to = decode_to_field(buf)?;
    txn.value = U256::decode(buf)?;
    txn.data = Bytes::decode(buf)?;
    txn.access_list = Vec::<AccessListEntry>::decode(buf)?;
    txn.odd_y_parity = bool::decode(buf)?;
    txn.r = U256::decode(buf)?;
    txn.s = U256::decode(buf)?;

    if started_len - buf.len() != rlp_head.payload_length {
        return Err(DecodingError::ListLengthMismatch);
    }
    Ok(txn)
}

fn decode_legacy(buf: &mut &[u8]) -> Result<Transaction, DecodingError> {
    let rlp_head = alloy_rlp::Header::decode(buf)?;
    if !rlp_head.list {
        return Err(DecodingError::UnexpectedString);
    }
    let started_len = buf.len();

    let mut txn = Transaction { tx_type: TxType::Legacy, ..Default::default() };
    txn.nonce = u64::decode(buf)?;
    txn.max_fee_per_gas = U256::decode(buf)?;
    txn.max_priority_fee_per_gas = txn.max_fee_per_gas;
    txn.gas_limit = u64::decode(buf)?;
    txn.to = decode_to_field(buf)?;
    txn.value = U256::decode(buf)?;
    txn.data = Bytes::decode(buf)?;
    let v = U256::decode(buf)?;
    if !txn.set_v(v) {
        return Err(DecodingError::InvalidVInSignature);
    }
    txn.r = U256::decode(buf)?;
    txn.s = U256::decode(buf)?;

    if started_len - buf.len() != rlp_head.payload_length {
        return Err(DecodingError::ListLengthMismatch);
    }
    Ok(txn)
}

impl Encodable for Transaction {
    fn encode(&self, out: &mut dyn alloy_rlp::BufMut) {
        let mut buf = Vec::new();
        self.encode_with(&mut buf, false, true);
        out.put_slice(&buf);
    }

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode_with(&mut buf, false, true);
        buf.len()
    }
}

impl Decodable for Transaction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        decode_transaction(buf, Eip2718Wrapping::String)
            .map_err(|_| alloy_rlp::Error::Custom("invalid transaction payload"))
    }
}
