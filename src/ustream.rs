//! Uncompressed-side stream: the sliding window and look-ahead buffer.
//!
//! A `UStream` either *produces* tokens (compression: it owns the window,
//! the look-ahead and the search tree, and turns input bytes into symbol and
//! phrase tokens) or *consumes* them (decompression: it replays tokens
//! against the window to reconstruct the original bytes). The backing store
//! is an in-memory buffer or a byte-oriented source/sink.

use std::io::{Read, Write};

use crate::bits::ensure_capacity;
use crate::error::{Error, Result};
use crate::huffman::{bit_width, min_match_length, LengthCode};
use crate::tree::Tree;
use crate::{MIN_LOOKAHEAD_SIZE, MIN_WINDOW_SIZE};

/// How much larger than `window + lookahead` the internal buffer of a
/// source-backed stream is. Bigger means fewer refills and compactions.
const READ_BUFFER_FACTOR: usize = 10;

/// An LZ77 token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// A literal byte, emitted when no profitable match exists.
    Symbol(u8),
    /// A back-reference into the sliding window.
    Phrase {
        /// Offset of the match from the window start.
        offset: u16,
        /// Match length; may exceed the window remainder and run into the
        /// bytes the phrase itself produces.
        length: u16,
    },
    /// End-of-stream marker (a phrase-shaped token with length 0).
    Terminator,
}

enum Backing<'a> {
    /// Compression input borrowed from the caller.
    FromSlice { data: &'a [u8] },
    /// Compression input pulled from a byte source through `buf`.
    FromReader {
        reader: Box<dyn Read + 'a>,
        buf: Vec<u8>,
    },
    /// Decompression output accumulated in an owned buffer.
    ToMemory {
        buf: Vec<u8>,
        fixed_capacity: Option<usize>,
    },
    /// Decompression output pushed to a byte sink; `buf` holds the
    /// reconstruction window plus not-yet-flushed bytes.
    ToWriter {
        writer: Box<dyn Write + 'a>,
        buf: Vec<u8>,
    },
}

/// A stream of uncompressed bytes, with the sliding window over it.
pub struct UStream<'a> {
    backing: Backing<'a>,
    /// Offset of the window inside the backing bytes.
    wstart: usize,
    wmax: u16,
    wsize: u16,
    lmax: u16,
    lsize: u16,
    /// End of valid data inside the backing bytes. The look-ahead position
    /// is always `wstart + wsize`.
    end: usize,
    /// Match finder; input side only.
    tree: Option<Tree>,
    /// Length coder; input side only (the compressed stream carries its own).
    code: Option<LengthCode>,
    processed_bytes: u64,
    opened: bool,
}

fn validate_sizes(window: u16, lookahead: u16) -> Result<()> {
    if window < MIN_WINDOW_SIZE {
        let msg = format!("window size {window} is below the minimum {MIN_WINDOW_SIZE}");
        tracing::error!("{msg}");
        return Err(Error::InvalidArgument(msg));
    }
    if lookahead < MIN_LOOKAHEAD_SIZE {
        let msg = format!("look-ahead size {lookahead} is below the minimum {MIN_LOOKAHEAD_SIZE}");
        tracing::error!("{msg}");
        return Err(Error::InvalidArgument(msg));
    }
    if lookahead > window {
        let msg = format!("look-ahead size {lookahead} exceeds window size {window}");
        tracing::error!("{msg}");
        return Err(Error::InvalidArgument(msg));
    }
    Ok(())
}

/// Read until `buf[filled..]` is full or the source reports EOF.
fn read_full(reader: &mut dyn Read, buf: &mut [u8], mut filled: usize) -> Result<usize> {
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl<'a> UStream<'a> {
    /// Compression input over an in-memory buffer.
    pub fn from_memory(data: &'a [u8], window: u16, lookahead: u16) -> Result<Self> {
        validate_sizes(window, lookahead)?;
        Ok(Self::new_input(
            Backing::FromSlice { data },
            data.len(),
            window,
            lookahead,
        ))
    }

    /// Compression input pulled from a byte source.
    pub fn from_reader(reader: impl Read + 'a, window: u16, lookahead: u16) -> Result<Self> {
        validate_sizes(window, lookahead)?;
        let buf = vec![0; (window as usize + lookahead as usize) * READ_BUFFER_FACTOR];
        Ok(Self::new_input(
            Backing::FromReader {
                reader: Box::new(reader),
                buf,
            },
            0,
            window,
            lookahead,
        ))
    }

    /// Decompression output into a growable buffer.
    pub fn to_memory() -> Self {
        Self::new_output(Backing::ToMemory {
            buf: Vec::new(),
            fixed_capacity: None,
        })
    }

    /// Decompression output into a buffer capped at `capacity` bytes.
    /// Decompressing more than that fails with [`Error::OutOfMemory`].
    pub fn to_fixed(capacity: usize) -> Self {
        Self::new_output(Backing::ToMemory {
            buf: Vec::with_capacity(capacity),
            fixed_capacity: Some(capacity),
        })
    }

    /// Decompression output pushed to a byte sink.
    pub fn to_writer(writer: impl Write + 'a) -> Self {
        Self::new_output(Backing::ToWriter {
            writer: Box::new(writer),
            buf: Vec::new(),
        })
    }

    fn new_input(backing: Backing<'a>, end: usize, window: u16, lookahead: u16) -> Self {
        let wbits = bit_width(window - 1);
        Self {
            backing,
            wstart: 0,
            wmax: window,
            wsize: 0,
            lmax: lookahead,
            lsize: 0,
            end,
            tree: Some(Tree::new(window)),
            code: Some(LengthCode::new(min_match_length(wbits), lookahead)),
            processed_bytes: 0,
            opened: false,
        }
    }

    fn new_output(backing: Backing<'a>) -> Self {
        Self {
            backing,
            wstart: 0,
            wmax: 0,
            wsize: 0,
            lmax: 0,
            lsize: 0,
            end: 0,
            tree: None,
            code: None,
            processed_bytes: 0,
            opened: false,
        }
    }

    /// The buffer of a memory-backed stream: the input slice on the
    /// compression side, the reconstructed bytes on the decompression side.
    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::FromSlice { data } => Some(data),
            Backing::ToMemory { buf, .. } => Some(buf),
            _ => None,
        }
    }

    /// Consume the stream and return the owned output buffer, when
    /// decompressing to memory.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self.backing {
            Backing::ToMemory { buf, .. } => Some(buf),
            _ => None,
        }
    }

    /// Bytes consumed from (compression) or written to (decompression) the
    /// stream so far.
    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes
    }

    pub(crate) fn window_max(&self) -> u16 {
        self.wmax
    }

    pub(crate) fn lookahead_max(&self) -> u16 {
        self.lmax
    }

    /// Prepare an input stream: fill the look-ahead from the backing store.
    pub(crate) fn open_reader(&mut self) -> Result<()> {
        if self.tree.is_none() {
            return Err(Error::InvalidArgument(
                "stream was created for output, cannot compress from it".into(),
            ));
        }
        if self.opened {
            return Err(Error::InvalidArgument("stream is already open".into()));
        }
        if let Backing::FromReader { reader, buf } = &mut self.backing {
            self.end = read_full(reader.as_mut(), buf, 0)?;
        }
        self.lsize = self.end.min(self.lmax as usize) as u16;
        self.opened = true;
        Ok(())
    }

    /// Prepare an output stream with the parameters recovered from the
    /// compressed header.
    pub(crate) fn open_writer(&mut self, window: u16, lookahead: u16) -> Result<()> {
        if self.tree.is_some() {
            return Err(Error::InvalidArgument(
                "stream was created for input, cannot decompress into it".into(),
            ));
        }
        if self.opened {
            return Err(Error::InvalidArgument("stream is already open".into()));
        }
        validate_sizes(window, lookahead)?;
        self.wmax = window;
        self.lmax = lookahead;
        if let Backing::ToWriter { buf, .. } = &mut self.backing {
            buf.resize(window as usize * READ_BUFFER_FACTOR, 0);
        }
        self.opened = true;
        Ok(())
    }

    /// Flush any bytes still held for a sink-backed output stream.
    pub(crate) fn close(&mut self) -> Result<()> {
        if let Backing::ToWriter { writer, buf } = &mut self.backing {
            writer.write_all(&buf[..self.end])?;
            writer.flush()?;
            self.end = 0;
            self.wstart = 0;
        }
        Ok(())
    }

    /// Produce the next token from the input, advancing the window past the
    /// bytes it covers. Returns `None` at end of input.
    pub(crate) fn next_token(&mut self) -> Result<Option<Token>> {
        if self.tree.is_none() || self.code.is_none() || !self.opened {
            return Err(Error::InvalidArgument(
                "stream is not open for reading tokens".into(),
            ));
        }
        if self.lsize == 0 {
            return Ok(None);
        }

        let mut length = 0;
        let mut offset = 0;
        if self.wsize == 0 {
            // Very first byte: it becomes the root of the search tree and is
            // always emitted as a literal.
            if let Some(tree) = self.tree.as_mut() {
                tree.seed();
            }
        } else {
            let data: &[u8] = match &self.backing {
                Backing::FromSlice { data } => data,
                Backing::FromReader { buf, .. } => buf,
                _ => unreachable!(),
            };
            let lookahead_pos = self.wstart + self.wsize as usize;
            let curr = (lookahead_pos % self.wmax as usize) as u16;
            if let Some(tree) = self.tree.as_mut() {
                let (l, o) = tree.find_and_insert(data, self.wstart, lookahead_pos, self.lsize, curr);
                length = l;
                offset = o;
            }
        }

        let encodable = match &self.code {
            Some(code) => code.can_encode(length),
            None => unreachable!(),
        };

        let (token, count) = if length == 0 || !encodable {
            let next = self.input_bytes()[self.wstart + self.wsize as usize];
            (Token::Symbol(next), 1)
        } else {
            (Token::Phrase { offset, length }, length)
        };
        debug_assert!(count <= self.lsize);

        self.advance(count)?;
        self.processed_bytes += count as u64;
        Ok(Some(token))
    }

    /// Append a token to the output, reconstructing its bytes.
    pub(crate) fn write_token(&mut self, token: Token) -> Result<()> {
        if self.tree.is_some() || !self.opened {
            return Err(Error::InvalidArgument(
                "stream is not open for writing tokens".into(),
            ));
        }

        let (offset, length, next) = match token {
            Token::Symbol(byte) => (0u16, 0u16, byte),
            Token::Phrase { offset, length } => {
                debug_assert!(length > 0);
                if length > self.lmax {
                    return Err(Error::CorruptStream(format!(
                        "phrase length {} exceeds the look-ahead maximum {}",
                        length, self.lmax
                    )));
                }
                if offset >= self.wsize {
                    return Err(Error::CorruptStream(format!(
                        "phrase offset {} references beyond the window ({} bytes)",
                        offset, self.wsize
                    )));
                }
                (offset, length, 0)
            }
            Token::Terminator => {
                return Err(Error::InvalidArgument(
                    "the terminator is not written through the window".into(),
                ))
            }
        };
        let count = if length == 0 { 1 } else { length as usize };

        self.make_room(count)?;

        let data: &mut Vec<u8> = match &mut self.backing {
            Backing::ToMemory { buf, .. } => buf,
            Backing::ToWriter { buf, .. } => buf,
            _ => unreachable!(),
        };
        let src = self.wstart + offset as usize;
        if length == 0 {
            data[self.end] = next;
        } else if offset as usize + count <= self.wsize as usize {
            data.copy_within(src..src + count, self.end);
        } else {
            // The phrase runs into the bytes it is producing: copy one byte
            // at a time so the freshly written bytes feed the tail of the
            // match. This is the run-length corner of the format, and a
            // block copy would reproduce stale bytes instead.
            for i in 0..count {
                data[self.end + i] = data[src + i];
            }
        }

        // Slide the window over the bytes just produced.
        if self.wsize == self.wmax {
            self.wstart += count;
        } else {
            let room = (self.wmax - self.wsize) as usize;
            if count <= room {
                self.wsize += count as u16;
            } else {
                self.wsize = self.wmax;
                self.wstart += count - room;
            }
        }
        self.end += count;
        self.processed_bytes += count as u64;
        Ok(())
    }

    fn input_bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::FromSlice { data } => data,
            Backing::FromReader { buf, .. } => buf,
            _ => unreachable!(),
        }
    }

    /// Consume `count` bytes: slide the window one byte at a time, keeping
    /// the tree populated and the look-ahead full.
    fn advance(&mut self, count: u16) -> Result<()> {
        let w = self.wmax as usize;
        for i in 0..count {
            let last = i == count - 1;

            if !last {
                // The position one past the look-ahead is about to leave the
                // matchable window; drop its slot before sliding.
                let ahead = ((self.wstart + self.wsize as usize + 1) % w) as u16;
                if let Some(tree) = self.tree.as_mut() {
                    tree.delete(ahead);
                }
            }

            if self.wsize == self.wmax {
                self.wstart += 1;
            } else {
                self.wsize += 1;
            }

            // The look-ahead end may have passed the end of buffered data.
            if self.wstart + self.wsize as usize + self.lsize as usize > self.end {
                debug_assert_eq!(
                    self.wstart + self.wsize as usize + self.lsize as usize,
                    self.end + 1
                );
                // Once the look-ahead has started shrinking the source is
                // exhausted; until then a source-backed stream refills.
                let eof = self.lsize < self.lmax;
                let can_move = self.wstart > 0;
                let refillable = matches!(self.backing, Backing::FromReader { .. });
                if refillable && !eof && can_move {
                    self.compact_and_refill()?;
                } else {
                    self.lsize -= 1;
                }
            }

            if !last {
                let lookahead_pos = self.wstart + self.wsize as usize;
                let curr = (lookahead_pos % w) as u16;
                let data: &[u8] = match &self.backing {
                    Backing::FromSlice { data } => data,
                    Backing::FromReader { buf, .. } => buf,
                    _ => unreachable!(),
                };
                if let Some(tree) = self.tree.as_mut() {
                    tree.find_and_insert(data, self.wstart, lookahead_pos, self.lsize, curr);
                }
            }
        }
        Ok(())
    }

    /// Move the window to the front of the internal buffer, top the buffer
    /// back up from the source, and relabel the tree slots to match the new
    /// buffer offsets.
    fn compact_and_refill(&mut self) -> Result<()> {
        debug_assert_eq!(self.wsize, self.wmax);
        let w = self.wmax as usize;
        let lookahead_pos = self.wstart + self.wsize as usize;
        let tail = self.end - lookahead_pos;
        let data_size = w + tail;

        if let Backing::FromReader { reader, buf } = &mut self.backing {
            buf.copy_within(self.wstart..self.end, 0);
            let filled = read_full(reader.as_mut(), buf, data_size)?;
            let readcount = filled - data_size;

            let shift = self.wstart % w;
            if let Some(tree) = self.tree.as_mut() {
                tree.rotate(shift);
            }

            self.wstart = 0;
            self.end = filled;
            self.lsize = (tail + readcount).min(self.lmax as usize) as u16;
        }
        Ok(())
    }

    /// Make sure `count` more bytes fit after `end`, flushing or growing the
    /// backing store as its kind allows.
    fn make_room(&mut self, count: usize) -> Result<()> {
        let need = self.end + count;
        match &mut self.backing {
            Backing::ToMemory {
                buf,
                fixed_capacity,
            } => {
                if need > buf.len() {
                    ensure_capacity(buf, need - buf.len(), *fixed_capacity)?;
                    buf.resize(need, 0);
                }
            }
            Backing::ToWriter { writer, buf } => {
                if need > buf.len() {
                    // Everything before the window is final: flush it and
                    // keep only the last `wmax` bytes as the reconstruction
                    // window.
                    debug_assert_eq!(self.wsize, self.wmax);
                    writer.write_all(&buf[..self.wstart])?;
                    buf.copy_within(self.wstart..self.end, 0);
                    self.end -= self.wstart;
                    self.wstart = 0;
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect_tokens(stream: &mut UStream<'_>) -> Vec<Token> {
        stream.open_reader().unwrap();
        let mut tokens = Vec::new();
        while let Some(token) = stream.next_token().unwrap() {
            tokens.push(token);
        }
        tokens
    }

    /// Replay tokens through a real output stream.
    fn reconstruct(tokens: &[Token], window: u16, lookahead: u16) -> Vec<u8> {
        let mut out = UStream::to_memory();
        out.open_writer(window, lookahead).unwrap();
        for &token in tokens {
            out.write_token(token).unwrap();
        }
        out.into_buffer().unwrap()
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(
            UStream::from_memory(b"x", 2, 2),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            UStream::from_memory(b"x", 8, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            UStream::from_memory(b"x", 8, 9),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_first_token_is_a_symbol() {
        let mut stream = UStream::from_memory(b"ZZZZ", 4, 2).unwrap();
        stream.open_reader().unwrap();
        assert_eq!(stream.next_token().unwrap(), Some(Token::Symbol(b'Z')));
    }

    #[test]
    fn test_token_sequence_for_constant_input() {
        let mut stream = UStream::from_memory(b"AAAA", 4, 2).unwrap();
        let tokens = collect_tokens(&mut stream);
        assert_eq!(
            tokens,
            vec![
                Token::Symbol(b'A'),
                Token::Phrase { offset: 0, length: 2 },
                Token::Phrase { offset: 2, length: 1 },
            ]
        );
        assert_eq!(stream.processed_bytes(), 4);
        assert_eq!(reconstruct(&tokens, 4, 2), b"AAAA");
    }

    #[test]
    fn test_empty_input_produces_no_tokens() {
        let mut stream = UStream::from_memory(b"", 4, 2).unwrap();
        let tokens = collect_tokens(&mut stream);
        assert!(tokens.is_empty());
        assert_eq!(stream.processed_bytes(), 0);
    }

    #[test]
    fn test_tokens_reconstruct_input_across_window_states() {
        // Lengths from 1 to beyond 2L + W + 2 walk the window through the
        // empty, growing, full and draining states.
        let pattern: Vec<u8> = (0..64u32).map(|i| (i % 7) as u8 + b'a').collect();
        for len in 1..=pattern.len() {
            let input = &pattern[..len];
            let mut stream = UStream::from_memory(input, 8, 4).unwrap();
            let tokens = collect_tokens(&mut stream);
            assert_eq!(reconstruct(&tokens, 8, 4), input, "length {len}");
            assert_eq!(stream.processed_bytes(), len as u64);
        }
    }

    #[test]
    fn test_reader_backed_compaction_matches_memory() {
        // Enough repetitive data to overflow the (W + L) * 10 internal
        // buffer several times, forcing compaction and tree rotation, with a
        // period short enough that matches span the compaction points.
        let input: Vec<u8> = (0..1000u32).map(|i| (i % 5) as u8).collect();

        let mut from_mem = UStream::from_memory(&input, 8, 4).unwrap();
        let memory_tokens = collect_tokens(&mut from_mem);

        let mut from_rdr = UStream::from_reader(Cursor::new(input.clone()), 8, 4).unwrap();
        let reader_tokens = collect_tokens(&mut from_rdr);

        assert_eq!(memory_tokens, reader_tokens);
        assert_eq!(reconstruct(&reader_tokens, 8, 4), input);
    }

    #[test]
    fn test_write_token_overlapping_phrase() {
        let mut out = UStream::to_memory();
        out.open_writer(8, 4).unwrap();
        out.write_token(Token::Symbol(b'x')).unwrap();
        // offset 0, length 4 with a 1-byte window: run-length expansion.
        out.write_token(Token::Phrase { offset: 0, length: 4 }).unwrap();
        assert_eq!(out.buffer().unwrap(), b"xxxxx");
        assert_eq!(out.processed_bytes(), 5);
    }

    #[test]
    fn test_write_token_rejects_corrupt_references() {
        let mut out = UStream::to_memory();
        out.open_writer(8, 4).unwrap();
        out.write_token(Token::Symbol(b'x')).unwrap();
        assert!(matches!(
            out.write_token(Token::Phrase { offset: 1, length: 2 }),
            Err(Error::CorruptStream(_))
        ));
        assert!(matches!(
            out.write_token(Token::Phrase { offset: 0, length: 5 }),
            Err(Error::CorruptStream(_))
        ));
    }

    #[test]
    fn test_fixed_output_overflows() {
        let mut out = UStream::to_fixed(3);
        out.open_writer(8, 4).unwrap();
        out.write_token(Token::Symbol(b'a')).unwrap();
        out.write_token(Token::Symbol(b'b')).unwrap();
        out.write_token(Token::Symbol(b'c')).unwrap();
        assert_eq!(out.write_token(Token::Symbol(b'd')), Err(Error::OutOfMemory));
    }

    #[test]
    fn test_writer_backed_output_flushes_window() {
        let mut sink = Vec::new();
        {
            let mut out = UStream::to_writer(&mut sink);
            out.open_writer(4, 2).unwrap();
            // More than W * 10 bytes so the window-flush path runs.
            for i in 0..100u32 {
                out.write_token(Token::Symbol((i % 251) as u8)).unwrap();
            }
            out.close().unwrap();
            assert_eq!(out.processed_bytes(), 100);
        }
        let expected: Vec<u8> = (0..100u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(sink, expected);
    }

    #[test]
    fn test_mode_misuse_is_rejected() {
        let mut input = UStream::from_memory(b"abc", 4, 2).unwrap();
        assert!(matches!(
            input.open_writer(4, 2),
            Err(Error::InvalidArgument(_))
        ));

        let mut output = UStream::to_memory();
        assert!(matches!(output.open_reader(), Err(Error::InvalidArgument(_))));
    }
}
