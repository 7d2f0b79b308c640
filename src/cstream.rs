//! Compressed-side stream: the self-describing header and the token wire
//! format, layered over bit-granular I/O.
//!
//! Wire layout (all fields MSB-first):
//!
//! ```text
//! header:     "LZ77" version reserved[3] window_size:u16be lookahead_size:u16be
//! symbol:     0 · byte(8)
//! phrase:     1 · offset(wbits) · length-code
//! terminator: 1 · zero-offset(wbits) · length-code-for-0
//! ```
//!
//! Compressor and decompressor derive `wbits` and the length-code alphabet
//! from the same `(window, lookahead)` parameters, so the two ends agree on
//! every field width without negotiation.

use std::io::{Read, Write};

use crate::bits::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::huffman::{bit_width, min_match_length, LengthCode};
use crate::ustream::Token;
use crate::{
    FORMAT_VERSION, MAGIC, MIN_LOOKAHEAD_SIZE, MIN_WINDOW_SIZE, SYMBOL_BITS, SYMBOL_VALUE_BITS,
};

/// Size of the stream header in bytes.
pub const HEADER_SIZE: usize = 12;

enum Mode<'a> {
    Reader(BitReader<'a>),
    Writer(BitWriter<'a>),
}

/// A stream of compressed bits, with the header and token layout on top.
pub struct CStream<'a> {
    mode: Mode<'a>,
    /// Bits of a window offset on the wire; derived from the header.
    wbits: u8,
    code: Option<LengthCode>,
    opened: bool,
}

impl<'a> CStream<'a> {
    /// Decompression input over an in-memory buffer.
    pub fn from_memory(data: &'a [u8]) -> Self {
        Self::new(Mode::Reader(BitReader::from_slice(data)))
    }

    /// Decompression input pulled from a byte source.
    pub fn from_reader(reader: impl Read + 'a) -> Self {
        Self::new(Mode::Reader(BitReader::from_reader(reader)))
    }

    /// Compression output into a growable buffer.
    pub fn to_memory() -> Self {
        Self::new(Mode::Writer(BitWriter::to_memory()))
    }

    /// Compression output into a buffer capped at `capacity` bytes.
    /// Writing past that fails with [`Error::OutOfMemory`].
    pub fn to_fixed(capacity: usize) -> Self {
        Self::new(Mode::Writer(BitWriter::to_fixed(capacity)))
    }

    /// Compression output pushed to a byte sink.
    pub fn to_writer(writer: impl Write + 'a) -> Self {
        Self::new(Mode::Writer(BitWriter::to_writer(writer)))
    }

    fn new(mode: Mode<'a>) -> Self {
        Self {
            mode,
            wbits: 0,
            code: None,
            opened: false,
        }
    }

    /// Total bits consumed from or written to the stream, including bits
    /// still cached by the writer.
    pub fn processed_bits(&self) -> u64 {
        match &self.mode {
            Mode::Reader(reader) => reader.processed_bits(),
            Mode::Writer(writer) => writer.processed_bits(),
        }
    }

    /// The output buffer of a memory-backed compression stream.
    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.mode {
            Mode::Writer(writer) => writer.buffer(),
            Mode::Reader(_) => None,
        }
    }

    /// Consume the stream and return the owned output buffer, when
    /// compressing to memory.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self.mode {
            Mode::Writer(writer) => writer.into_buffer(),
            Mode::Reader(_) => None,
        }
    }

    /// Read and validate the header, fixing the stream parameters.
    /// Returns `(window, lookahead)`.
    pub(crate) fn open_reader(&mut self) -> Result<(u16, u16)> {
        if self.opened {
            return Err(Error::InvalidArgument("stream is already open".into()));
        }
        let Mode::Reader(reader) = &mut self.mode else {
            return Err(Error::InvalidArgument(
                "stream was created for output, cannot decompress from it".into(),
            ));
        };

        let mut header = [0u8; HEADER_SIZE];
        if reader.read(&mut header, 0, HEADER_SIZE * 8)? != HEADER_SIZE * 8 {
            tracing::error!("compressed stream shorter than a header");
            return Err(Error::UnexpectedEof);
        }
        if &header[0..4] != MAGIC {
            tracing::error!("invalid stream magic {:02x?}", &header[0..4]);
            return Err(Error::CorruptStream("invalid magic".into()));
        }
        if header[4] != FORMAT_VERSION {
            let msg = format!(
                "stream version {:#04x} does not match supported version {:#04x}",
                header[4], FORMAT_VERSION
            );
            tracing::error!("{msg}");
            return Err(Error::CorruptStream(msg));
        }
        let window = u16::from_be_bytes([header[8], header[9]]);
        let lookahead = u16::from_be_bytes([header[10], header[11]]);
        if window < MIN_WINDOW_SIZE {
            let msg = format!("header window size {window} is below the minimum {MIN_WINDOW_SIZE}");
            tracing::error!("{msg}");
            return Err(Error::CorruptStream(msg));
        }
        if lookahead < MIN_LOOKAHEAD_SIZE {
            let msg =
                format!("header look-ahead size {lookahead} is below the minimum {MIN_LOOKAHEAD_SIZE}");
            tracing::error!("{msg}");
            return Err(Error::CorruptStream(msg));
        }
        if lookahead > window {
            let msg =
                format!("header look-ahead size {lookahead} exceeds window size {window}");
            tracing::error!("{msg}");
            return Err(Error::CorruptStream(msg));
        }

        self.set_params(window, lookahead);
        Ok((window, lookahead))
    }

    /// Emit the header for the given parameters.
    pub(crate) fn open_writer(&mut self, window: u16, lookahead: u16) -> Result<()> {
        if self.opened {
            return Err(Error::InvalidArgument("stream is already open".into()));
        }
        let Mode::Writer(writer) = &mut self.mode else {
            return Err(Error::InvalidArgument(
                "stream was created for input, cannot compress into it".into(),
            ));
        };

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(MAGIC);
        header[4] = FORMAT_VERSION;
        header[8..10].copy_from_slice(&window.to_be_bytes());
        header[10..12].copy_from_slice(&lookahead.to_be_bytes());
        writer.write_bytes(&header)?;

        self.set_params(window, lookahead);
        Ok(())
    }

    fn set_params(&mut self, window: u16, lookahead: u16) {
        self.wbits = bit_width(window - 1);
        self.code = Some(LengthCode::new(min_match_length(self.wbits), lookahead));
        self.opened = true;
    }

    /// Append one token to the bitstream.
    pub(crate) fn write_token(&mut self, token: Token) -> Result<()> {
        let Some(code) = self.code else {
            return Err(Error::InvalidArgument("stream is not open".into()));
        };
        let Mode::Writer(writer) = &mut self.mode else {
            return Err(Error::InvalidArgument(
                "token written to an input stream".into(),
            ));
        };

        match token {
            Token::Symbol(byte) => writer.write_bits(byte as u64, SYMBOL_BITS),
            Token::Phrase { offset, length } => {
                let c = code.encode(length);
                let bits = (((1u64 << self.wbits) | offset as u64) << c.length) | c.code as u64;
                writer.write_bits(bits, 1 + self.wbits + c.length)
            }
            Token::Terminator => {
                let c = code.encode(0);
                let bits = ((1u64 << self.wbits) << c.length) | c.code as u64;
                writer.write_bits(bits, 1 + self.wbits + c.length)
            }
        }
    }

    /// Read one token from the bitstream. The terminator is returned as
    /// [`Token::Terminator`]; running out of bits mid-token is
    /// [`Error::UnexpectedEof`].
    pub(crate) fn read_token(&mut self) -> Result<Token> {
        let Some(code) = self.code else {
            return Err(Error::InvalidArgument("stream is not open".into()));
        };
        let Mode::Reader(reader) = &mut self.mode else {
            return Err(Error::InvalidArgument(
                "token read from an output stream".into(),
            ));
        };

        let mut flag = [0u8; 1];
        if reader.read(&mut flag, 0, 1)? != 1 {
            return Err(Error::UnexpectedEof);
        }

        if flag[0] & 0x80 == 0 {
            let mut byte = [0u8; 1];
            if reader.read(&mut byte, 0, SYMBOL_VALUE_BITS as usize)? != SYMBOL_VALUE_BITS as usize
            {
                return Err(Error::UnexpectedEof);
            }
            return Ok(Token::Symbol(byte[0]));
        }

        let obits = self.wbits as usize;
        let mut obuf = [0u8; 2];
        if reader.read(&mut obuf, 16 - obits, obits)? != obits {
            return Err(Error::UnexpectedEof);
        }
        let offset = u16::from_be_bytes(obuf);

        // Peek enough bits for the longest possible length code, decode,
        // then consume exactly what the code used. A retry that produces no
        // additional bits means the stream ended mid-token.
        let mut last_peek = 0;
        let (length, consumed) = loop {
            let mut pbuf = [0u8; 4];
            let avail = reader.peek(&mut pbuf, 0, 32)?;
            let peeked = u32::from_be_bytes(pbuf);
            match code.decode(peeked, avail as u8)? {
                Some(pair) => break pair,
                None => {
                    if avail == last_peek {
                        return Err(Error::UnexpectedEof);
                    }
                    last_peek = avail;
                }
            }
        };
        reader.consume(consumed as usize);

        if length == 0 {
            Ok(Token::Terminator)
        } else {
            Ok(Token::Phrase { offset, length })
        }
    }

    /// Flush the bit cache and any staged bytes to the sink.
    pub(crate) fn close(&mut self) -> Result<()> {
        if let Mode::Writer(writer) = &mut self.mode {
            writer.flush_close()?;
        }
        Ok(())
    }
}
