//! Compression and decompression drivers.
//!
//! The codec owns nothing itself: it opens the paired streams, pumps tokens
//! from one into the other, writes or honours the terminator, and closes
//! both. Errors from any layer propagate unchanged.

use crate::cstream::CStream;
use crate::error::Result;
use crate::ustream::{Token, UStream};

/// Compress `original` into `compressed`.
///
/// Opens both streams (emitting the header), runs the token loop, appends
/// the terminator and flushes. Returns the total number of compressed bytes
/// produced, header included.
pub fn compress(original: &mut UStream<'_>, compressed: &mut CStream<'_>) -> Result<u64> {
    original.open_reader()?;
    compressed.open_writer(original.window_max(), original.lookahead_max())?;

    while let Some(token) = original.next_token()? {
        compressed.write_token(token)?;
    }
    compressed.write_token(Token::Terminator)?;

    original.close()?;
    compressed.close()?;

    let bytes = (compressed.processed_bits() + 7) / 8;
    tracing::debug!(
        input_bytes = original.processed_bytes(),
        output_bytes = bytes,
        "compression finished"
    );
    Ok(bytes)
}

/// Decompress `compressed` into `original`.
///
/// Opens the compressed stream first; the header parameters configure the
/// reconstruction window. Runs the token loop until the terminator, then
/// flushes. Returns the total number of decompressed bytes produced.
pub fn decompress(compressed: &mut CStream<'_>, original: &mut UStream<'_>) -> Result<u64> {
    let (window, lookahead) = compressed.open_reader()?;
    original.open_writer(window, lookahead)?;

    loop {
        match compressed.read_token()? {
            Token::Terminator => break,
            token => original.write_token(token)?,
        }
    }

    compressed.close()?;
    original.close()?;

    tracing::debug!(
        output_bytes = original.processed_bytes(),
        "decompression finished"
    );
    Ok(original.processed_bytes())
}
