//! gzip / zlib wrappers around flate2, streamed in 16 KiB chunks.

use crate::error::{BdfError, CodecFailure, Result};
use crate::types::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::{self, BufRead, BufReader, Read, Write};

pub const CHUNK: usize = 16 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn failure_of(err: &io::Error) -> CodecFailure {
	match err.kind() {
		io::ErrorKind::OutOfMemory => CodecFailure::MemoryExhausted,
		_ => CodecFailure::BadInput,
	}
}

fn level() -> flate2::Compression {
	flate2::Compression::default()
}

/// Copies `reader` into `writer` one chunk at a time.
fn pump<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<u64> {
	let mut chunk = vec![0u8; CHUNK];
	let mut total = 0u64;
	loop {
		let n = match reader.read(&mut chunk) {
			Ok(0) => return Ok(total),
			Ok(n) => n,
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e),
		};
		writer.write_all(&chunk[..n])?;
		total += n as u64;
	}
}

/// Compresses `reader` into `writer`; returns the compressed byte count.
pub fn deflate_stream<R: Read, W: Write>(reader: &mut R, writer: W, wrapper: Compression) -> Result<u64> {
	let mut counter = CountingWriter { inner: writer, count: 0 };
	match wrapper {
		Compression::None => {
			pump(reader, &mut counter)?;
		}
		Compression::Gzip => {
			let mut encoder = GzEncoder::new(&mut counter, level());
			pump(reader, &mut encoder)?;
			encoder.finish()?;
		}
		Compression::Zlib => {
			let mut encoder = ZlibEncoder::new(&mut counter, level());
			pump(reader, &mut encoder)?;
			encoder.finish()?;
		}
	}
	Ok(counter.count)
}

/// Rejects zlib headers that announce a method or window this codec
/// cannot decode.
fn check_zlib_header(head: &[u8]) -> Result<()> {
	let (Some(&cmf), Some(&flg)) = (head.first(), head.get(1)) else {
		return Ok(());
	};
	let method = cmf & 0x0f;
	let window = cmf >> 4;
	if u16::from_be_bytes([cmf, flg]) % 31 != 0 {
		return Ok(());
	}
	if method != 8 || window > 7 {
		return Err(BdfError::codec(
			CodecFailure::VersionMismatch,
			format!("zlib stream uses method {} with window 2^{}", method, window as u32 + 8),
		));
	}
	if flg & 0x20 != 0 {
		return Err(BdfError::codec(CodecFailure::VersionMismatch, "zlib stream needs a preset dictionary"));
	}
	Ok(())
}

/// Decompresses `reader` into `writer`; returns the inflated byte count.
pub fn inflate_stream<R: Read, W: Write>(reader: R, writer: &mut W, wrapper: Compression) -> Result<u64> {
	let copied = match wrapper {
		Compression::None => {
			let mut reader = reader;
			pump(&mut reader, writer)
		}
		Compression::Gzip => pump(&mut GzDecoder::new(reader), writer),
		Compression::Zlib => {
			let mut reader = BufReader::with_capacity(CHUNK, reader);
			check_zlib_header(reader.fill_buf()?)?;
			pump(&mut ZlibDecoder::new(reader), writer)
		}
	};
	copied.map_err(|e| BdfError::codec(failure_of(&e), format!("{} stream: {}", wrapper, e)))
}

pub fn deflate(input: &[u8], wrapper: Compression) -> Result<Vec<u8>> {
	let mut out = Vec::with_capacity(input.len() / 2 + 64);
	let mut reader = input;
	deflate_stream(&mut reader, &mut out, wrapper)?;
	Ok(out)
}

pub fn inflate(input: &[u8], wrapper: Compression) -> Result<Vec<u8>> {
	let mut out = Vec::with_capacity(input.len().saturating_mul(2));
	inflate_stream(input, &mut out, wrapper)?;
	Ok(out)
}

/// Channel-to-buffer inflate.
pub fn inflate_reader<R: Read>(reader: R, wrapper: Compression) -> Result<Vec<u8>> {
	let mut out = Vec::new();
	inflate_stream(reader, &mut out, wrapper)?;
	Ok(out)
}

/// Inflates into a caller buffer that must not be reallocated.
///
/// Fails with [`CodecFailure::OutputTooSmall`] when the stream holds more
/// bytes than `out` can take. Returns the number of bytes written.
pub fn inflate_into(input: &[u8], wrapper: Compression, out: &mut [u8]) -> Result<usize> {
	let capacity = out.len();
	let mut sink = SliceWriter { buf: out, pos: 0 };
	match inflate_stream(input, &mut sink, wrapper) {
		Ok(n) => Ok(n as usize),
		Err(BdfError::CompressionError { message, .. }) if sink.overflowed() => Err(BdfError::codec(
			CodecFailure::OutputTooSmall,
			format!("{} byte output buffer: {}", capacity, message),
		)),
		Err(e) => Err(e),
	}
}

/// Guesses the wrapper of a compressed stream from its first bytes.
pub fn sniff(prefix: &[u8]) -> Compression {
	if prefix.starts_with(&GZIP_MAGIC) {
		Compression::Gzip
	} else if prefix.len() >= 2 && prefix[0] & 0x0f == 8 && u16::from_be_bytes([prefix[0], prefix[1]]) % 31 == 0 {
		Compression::Zlib
	} else {
		Compression::None
	}
}

struct CountingWriter<W> {
	inner: W,
	count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let n = self.inner.write(buf)?;
		self.count += n as u64;
		Ok(n)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.inner.flush()
	}
}

struct SliceWriter<'a> {
	buf: &'a mut [u8],
	pos: usize,
}

impl SliceWriter<'_> {
	fn overflowed(&self) -> bool {
		self.pos == usize::MAX
	}
}

impl Write for SliceWriter<'_> {
	fn write(&mut self, data: &[u8]) -> io::Result<usize> {
		if self.overflowed() || self.pos + data.len() > self.buf.len() {
			self.pos = usize::MAX;
			return Err(io::Error::new(io::ErrorKind::WriteZero, "output buffer exhausted"));
		}
		self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
		self.pos += data.len();
		Ok(data.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> Vec<u8> {
		(0..100_000u32).map(|i| (i % 251) as u8).collect()
	}

	#[test]
	fn test_gzip_and_zlib() {
		let data = sample();
		for wrapper in [Compression::Gzip, Compression::Zlib] {
			let packed = deflate(&data, wrapper).unwrap();
			assert!(packed.len() < data.len());
			assert_eq!(sniff(&packed), wrapper);
			assert_eq!(inflate(&packed, wrapper).unwrap(), data);
		}
	}

	#[test]
	fn test_bad_input() {
		let err = inflate(b"definitely not gzip", Compression::Gzip).unwrap_err();
		assert!(matches!(err, BdfError::CompressionError { failure: CodecFailure::BadInput, .. }));
	}

	#[test]
	fn test_unsupported_zlib_header() {
		// method 15 is reserved
		let err = inflate(&[0x7f, 0x07, 0, 0], Compression::Zlib).unwrap_err();
		assert!(matches!(err, BdfError::CompressionError { failure: CodecFailure::VersionMismatch, .. }));
		// preset dictionary
		let err = inflate(&[0x78, 0xbb, 0, 0, 0, 0], Compression::Zlib).unwrap_err();
		assert!(matches!(err, BdfError::CompressionError { failure: CodecFailure::VersionMismatch, .. }));
		let err = inflate(b"xx not zlib", Compression::Zlib).unwrap_err();
		assert!(matches!(err, BdfError::CompressionError { failure: CodecFailure::BadInput, .. }));
	}

	#[test]
	fn test_output_too_small() {
		let data = sample();
		let packed = deflate(&data, Compression::Zlib).unwrap();
		let mut small = vec![0u8; 1000];
		let err = inflate_into(&packed, Compression::Zlib, &mut small).unwrap_err();
		assert!(matches!(err, BdfError::CompressionError { failure: CodecFailure::OutputTooSmall, .. }));

		let mut exact = vec![0u8; data.len()];
		assert_eq!(inflate_into(&packed, Compression::Zlib, &mut exact).unwrap(), data.len());
		assert_eq!(exact, data);
	}

	#[test]
	fn test_none_is_copy() {
		assert_eq!(deflate(b"abc", Compression::None).unwrap(), b"abc");
		assert_eq!(sniff(b"{\r\n"), Compression::None);
	}
}
