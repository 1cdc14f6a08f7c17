use std::io::{BufRead, Error, ErrorKind, Result, Seek, SeekFrom, Write};

use bincode::{
	config::{Configuration, Fixint, LittleEndian, NoLimit},
	Decode, Encode,
};

/// SFS is little-endian throughout, with fixed-width integers.
#[derive(Clone, Copy)]
pub struct Config(Configuration<LittleEndian, Fixint, NoLimit>);

impl std::fmt::Debug for Config {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Config").finish()
	}
}

impl Config {
	pub const fn little() -> Self {
		let cfg = bincode::config::standard()
			.with_fixed_int_encoding()
			.with_little_endian();
		Self(cfg)
	}

	fn decode<T: Decode>(&self, mut rdr: &mut dyn BufRead) -> Result<T> {
		bincode::decode_from_std_read(&mut rdr, self.0)
			.map_err(|_| Error::new(ErrorKind::InvalidData, "failed to decode"))
	}

	pub fn encode_to_vec<T: Encode>(&self, val: &T) -> Result<Vec<u8>> {
		bincode::encode_to_vec(val, self.0)
			.map_err(|_| Error::new(ErrorKind::InvalidData, "failed to encode"))
	}
}

/// Typed random-access view of the image file.
#[derive(Debug)]
pub struct Decoder<T: BufRead> {
	inner:  T,
	config: Config,
}

impl<T: BufRead> Decoder<T> {
	pub fn new(inner: T, config: Config) -> Self {
		Self {
			inner,
			config,
		}
	}

	pub fn inner(&self) -> &T {
		&self.inner
	}

	pub fn into_inner(self) -> T {
		self.inner
	}

	pub fn decode<X: Decode>(&mut self) -> Result<X> {
		self.config.decode(&mut self.inner)
	}

	pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
		self.inner.read_exact(buf)
	}

	pub fn config(&self) -> Config {
		self.config
	}
}

impl<T: BufRead + Seek> Decoder<T> {
	pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
		self.seek(pos)?;
		self.read(buf)
	}

	pub fn decode_at<X: Decode>(&mut self, pos: u64) -> Result<X> {
		self.seek(pos)?;
		self.decode()
	}

	pub fn seek(&mut self, pos: u64) -> Result<()> {
		self.inner.seek(SeekFrom::Start(pos))?;
		Ok(())
	}

	pub fn pos(&mut self) -> Result<u64> {
		self.inner.stream_position()
	}
}

impl<T: BufRead + Write + Seek> Decoder<T> {
	pub fn encode<X: Encode>(&mut self, val: &X) -> Result<()> {
		let buf = self.config.encode_to_vec(val)?;
		self.inner.write_all(&buf)
	}

	pub fn encode_at<X: Encode>(&mut self, pos: u64, val: &X) -> Result<()> {
		self.seek(pos)?;
		self.encode(val)
	}

	pub fn write(&mut self, buf: &[u8]) -> Result<()> {
		self.inner.write_all(buf)
	}

	pub fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
		self.seek(pos)?;
		self.write(buf)
	}

	pub fn fill(&mut self, byte: u8, mut len: u64) -> Result<()> {
		let chunk = [byte; 512];
		while len > 0 {
			let n = len.min(chunk.len() as u64) as usize;
			self.inner.write_all(&chunk[..n])?;
			len -= n as u64;
		}
		Ok(())
	}

	pub fn fill_at(&mut self, pos: u64, byte: u8, len: u64) -> Result<()> {
		self.seek(pos)?;
		self.fill(byte, len)
	}
}
