//! # backref
//!
//! An LZ77 compression library built around an explicit sliding window, a
//! binary-search-tree match finder, and a bit-granular, self-describing
//! stream format.
//!
//! Repeated byte sequences are replaced by `(offset, length)` back-references
//! into the most recent `window` bytes; match lengths are packed with a
//! static prefix code parameterised by the window and look-ahead sizes.
//! Streams can be compressed from and decompressed to in-memory buffers or
//! any [`std::io::Read`] / [`std::io::Write`] endpoint.
//!
//! ## Example
//!
//! ```rust
//! use backref::{compress, decompress, CStream, UStream};
//!
//! let data = b"abracadabra abracadabra";
//!
//! let mut input = UStream::from_memory(data, 512, 32)?;
//! let mut packed = CStream::to_memory();
//! compress(&mut input, &mut packed)?;
//!
//! let bytes = packed.into_buffer().unwrap();
//! let mut unpacker = CStream::from_memory(&bytes);
//! let mut output = UStream::to_memory();
//! decompress(&mut unpacker, &mut output)?;
//!
//! assert_eq!(output.buffer().unwrap(), data);
//! # Ok::<(), backref::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bits;
mod huffman;
mod tree;

pub mod codec;
pub mod cstream;
pub mod error;
pub mod ustream;

pub use codec::{compress, decompress};
pub use cstream::CStream;
pub use error::{Error, Result};
pub use ustream::{Token, UStream};

/// Magic bytes identifying a compressed stream.
pub const MAGIC: &[u8; 4] = b"LZ77";

/// Stream format version: major in the high nibble, minor in the low.
pub const FORMAT_VERSION: u8 = 0x10;

/// The smallest accepted sliding-window size.
pub const MIN_WINDOW_SIZE: u16 = 4;

/// The smallest accepted look-ahead buffer size.
pub const MIN_LOOKAHEAD_SIZE: u16 = 2;

/// Bits identifying the type of a token on the wire.
pub(crate) const TOKEN_TYPE_BITS: u8 = 1;

/// Bits carrying the literal byte of a symbol token.
pub(crate) const SYMBOL_VALUE_BITS: u8 = 8;

/// Total wire cost of a symbol token.
pub(crate) const SYMBOL_BITS: u8 = TOKEN_TYPE_BITS + SYMBOL_VALUE_BITS;
