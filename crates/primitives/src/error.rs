//! Decoding error taxonomy shared by the RLP layer and the storage codecs.

use thiserror::Error;

/// Errors raised while decoding RLP payloads or storage-encoded records.
///
/// Decoding failures are values, not panics: corrupt input from the wire is
/// reported upward, while corrupt input from a record that must be
/// well-formed is escalated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodingError {
    /// A length or numeric field exceeds its domain.
    #[error("numeric overflow")]
    Overflow,
    /// A canonical integer encoding carries a leading zero byte.
    #[error("leading zero in integer encoding")]
    LeadingZero,
    /// The payload ends before the announced length.
    #[error("input too short")]
    InputTooShort,
    /// A length was encoded in a non-canonical form.
    #[error("non-canonical size encoding")]
    NonCanonicalSize,
    /// A field has a length incompatible with its type.
    #[error("unexpected length")]
    UnexpectedLength,
    /// A string was found where a list was required.
    #[error("unexpected string")]
    UnexpectedString,
    /// A list was found where a string was required.
    #[error("unexpected list")]
    UnexpectedList,
    /// The list payload length does not match the consumed bytes.
    #[error("list length mismatch")]
    ListLengthMismatch,
    /// `v` is not 27, 28, nor a valid EIP-155 value.
    #[error("invalid v in signature")]
    InvalidVInSignature,
    /// The EIP-2718 type byte names an unknown transaction type.
    #[error("unsupported transaction type")]
    UnsupportedTransactionType,
    /// A storage-encoded account carries an invalid fieldset mask.
    #[error("invalid fieldset")]
    InvalidFieldset,
    /// A typed transaction arrived with a wrapping the decoder was not
    /// configured to accept.
    #[error("unexpected EIP-2718 serialization")]
    UnexpectedEip2718Serialization,
    /// A trie node record announces more or fewer hashes than its mask.
    #[error("invalid hashes length in trie node")]
    InvalidHashesLength,
    /// A trie node record's tree/hash masks are not subsets of the state
    /// mask.
    #[error("invalid mask subsets in trie node")]
    InvalidMasksSubsets,
}

impl From<alloy_rlp::Error> for DecodingError {
    fn from(err: alloy_rlp::Error) -> Self {
        match err {
            alloy_rlp::Error::Overflow => Self::Overflow,
            alloy_rlp::Error::LeadingZero => Self::LeadingZero,
            alloy_rlp::Error::InputTooShort => Self::InputTooShort,
            alloy_rlp::Error::NonCanonicalSingleByte | alloy_rlp::Error::NonCanonicalSize => {
                Self::NonCanonicalSize
            }
            alloy_rlp::Error::UnexpectedLength => Self::UnexpectedLength,
            alloy_rlp::Error::UnexpectedString => Self::UnexpectedString,
            alloy_rlp::Error::UnexpectedList => Self::UnexpectedList,
            alloy_rlp::Error::ListLengthMismatch { .. } => Self::ListLengthMismatch,
            _ => Self::UnexpectedLength,
        }
    }
}
