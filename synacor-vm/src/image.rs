//! Program images
//!
//! An image is a flat sequence of little-endian 16-bit words, loaded starting
//! at address 0.  There is no header.
use crate::{MAX_OPERAND, MEMORY_SIZE, Word};
use thiserror::Error;
use zerocopy::{FromBytes, IntoBytes, LittleEndian, U16};

/// Error type for image decoding and validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    /// The image is not a whole number of words
    #[error("image has an odd number of bytes ({0})")]
    OddLength(usize),

    /// The image does not fit into memory
    #[error("image is {0} words long, but memory only holds {max}", max = MEMORY_SIZE)]
    TooLarge(usize),

    /// The image contains a word which can't be a literal or register
    #[error("invalid word {value} at address {index}")]
    InvalidWord {
        /// Address of the word
        index: usize,
        /// Value of the word
        value: Word,
    },
}

/// Checks that a program fits into memory and contains only valid words
pub fn validate(words: &[Word]) -> Result<(), ImageError> {
    if words.len() > MEMORY_SIZE {
        return Err(ImageError::TooLarge(words.len()));
    }
    match words.iter().position(|&w| w > MAX_OPERAND) {
        Some(index) => Err(ImageError::InvalidWord {
            index,
            value: words[index],
        }),
        None => Ok(()),
    }
}

/// Decodes a program image from raw bytes
pub fn decode(bytes: &[u8]) -> Result<Vec<Word>, ImageError> {
    let words = <[U16<LittleEndian>]>::ref_from_bytes(bytes)
        .map_err(|_| ImageError::OddLength(bytes.len()))?;
    let words: Vec<Word> = words.iter().map(|w| w.get()).collect();
    validate(&words)?;
    Ok(words)
}

/// Encodes a program as raw bytes
pub fn encode(words: &[Word]) -> Vec<u8> {
    let words: Vec<U16<LittleEndian>> =
        words.iter().map(|&w| U16::new(w)).collect();
    words.as_bytes().to_vec()
}
