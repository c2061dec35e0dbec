use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpackError {
    #[error("header block ended mid-field")]
    Truncated,
    #[error("header field references an unknown table index")]
    UnknownIndex,
    #[error("huffman-encoded field decoded to an invalid bit sequence")]
    HuffmanDecode,
}
