use std::{
	fs::File,
	io::{self, BufRead, Read, Result as IoResult, Seek, SeekFrom, Write},
	path::Path,
};

/// Anything an SFS image can live on.
pub trait Backend: Read + Write + Seek {}

impl<T: Read + Write + Seek> Backend for T {}

/// Buffer size for [`BlockReader::open`]; SFS images overwhelmingly use
/// 512-byte blocks, and any power of two works.
const DEFAULT_BUFSIZE: usize = 512;

/// Block-at-a-time buffered access to the image.
///
/// All reads and writes go through one block-sized buffer. A dirty buffer
/// is flushed back as soon as the position moves past it, so every
/// mutation reaches the image without batching.
#[derive(Debug)]
pub struct BlockReader<T: Backend> {
	inner: T,
	block: Vec<u8>,
	idx:   usize,
	dirty: bool,
	rw:    bool,
}

impl BlockReader<File> {
	pub fn open(path: &Path, rw: bool) -> IoResult<Self> {
		let file = File::options().read(true).write(rw).open(path)?;
		Ok(BlockReader::new(file, DEFAULT_BUFSIZE, rw))
	}
}

impl<T: Backend> BlockReader<T> {
	pub fn new(inner: T, bs: usize, rw: bool) -> Self {
		assert_eq!(bs.count_ones(), 1);
		Self {
			inner,
			block: vec![0u8; bs],
			idx: bs,
			dirty: false,
			rw,
		}
	}

	pub fn write_enabled(&self) -> bool {
		self.rw
	}

	/// Flush any pending block and hand back the backend.
	pub fn into_inner(mut self) -> T {
		let _ = self.flush();
		self.inner
	}

	pub fn blksize(&self) -> usize {
		self.block.len()
	}

	fn buffered(&self) -> usize {
		self.block.len() - self.idx
	}

	/// Read the block at the current position of `inner` into the buffer.
	/// Short reads at the end of the image are zero-padded.
	fn refill(&mut self) -> IoResult<()> {
		assert!(!self.dirty, "refilling a dirty block");
		self.block.fill(0u8);
		let mut num = 0;
		while num < self.block.len() {
			match self.inner.read(&mut self.block[num..])? {
				0 => break,
				n => num += n,
			}
		}
		if num < self.block.len() {
			log::error!("BlockReader::refill(): short read, num={num}");
		}
		self.idx = 0;
		Ok(())
	}

	fn refill_if_empty(&mut self) -> IoResult<()> {
		if self.buffered() == 0 {
			self.flush()?;
			self.refill()?;
		}
		Ok(())
	}
}

impl<T: Backend> Read for BlockReader<T> {
	fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
		self.refill_if_empty()?;
		let num = buf.len().min(self.buffered());
		buf[0..num].copy_from_slice(&self.block[self.idx..(self.idx + num)]);
		self.idx += num;
		Ok(num)
	}
}

impl<T: Backend> Write for BlockReader<T> {
	fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
		assert!(self.rw, "write to a read-only image");
		self.refill_if_empty()?;
		let num = buf.len().min(self.buffered());
		self.block[self.idx..(self.idx + num)].copy_from_slice(&buf[0..num]);
		self.idx += num;
		self.dirty = true;
		self.flush()?;
		Ok(num)
	}

	fn flush(&mut self) -> IoResult<()> {
		if !self.dirty {
			return Ok(());
		}
		self.inner
			.seek(SeekFrom::Current(-(self.block.len() as i64)))?;
		let mut num = 0;
		while num < self.block.len() {
			match self.inner.write(&self.block[num..])? {
				0 => break,
				n => num += n,
			}
		}
		if num < self.block.len() {
			log::error!("BlockReader::flush(): short write, num={num}");
		}
		self.dirty = false;
		Ok(())
	}
}

impl<T: Backend> BufRead for BlockReader<T> {
	fn fill_buf(&mut self) -> IoResult<&[u8]> {
		self.refill_if_empty()?;
		Ok(&self.block[self.idx..])
	}

	fn consume(&mut self, amt: usize) {
		assert!(amt <= self.buffered());
		self.idx += amt;
	}
}

impl<T: Backend> Seek for BlockReader<T> {
	fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
		let bs = self.blksize() as u64;
		match pos {
			SeekFrom::Start(pos) => {
				self.flush()?;
				let real = self.inner.seek(SeekFrom::Start(pos / bs * bs))?;
				let rem = pos - real;
				assert!(rem < bs);
				self.refill()?;
				self.idx = rem as usize;
				Ok(real + rem)
			}
			SeekFrom::Current(offset) => {
				let real = self.inner.stream_position()?;
				let cur = real - self.block.len() as u64 + self.idx as u64;
				let newidx = offset + self.idx as i64;
				if newidx >= 0 && newidx < self.blksize() as i64 && !self.dirty {
					// still inside the buffered block
					self.idx = newidx as usize;
					Ok(cur.wrapping_add_signed(offset))
				} else if (cur as i64) + offset < 0 {
					Err(io::Error::from_raw_os_error(libc::EINVAL))
				} else {
					self.seek(SeekFrom::Start((cur as i64 + offset) as u64))
				}
			}
			SeekFrom::End(_) => todo!("SeekFrom::End()"),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	const BS: usize = 512;

	fn image(blocks: usize) -> BlockReader<Cursor<Vec<u8>>> {
		BlockReader::new(Cursor::new(vec![0u8; BS * blocks]), BS, true)
	}

	#[test]
	fn write_then_read_back() {
		let mut br = image(4);
		let pos = (BS + BS / 4) as u64;
		let mut buf = vec![0xa5u8; BS];
		br.seek(SeekFrom::Start(pos)).unwrap();
		br.write_all(&buf).unwrap();
		buf.fill(0);
		br.seek(SeekFrom::Start(pos)).unwrap();
		br.read_exact(&mut buf).unwrap();
		assert_eq!(buf, vec![0xa5u8; BS]);
	}

	#[test]
	fn writes_reach_the_backend_immediately() {
		let mut br = image(2);
		br.seek(SeekFrom::Start(100)).unwrap();
		br.write_all(b"hello").unwrap();
		assert_eq!(&br.inner.get_ref()[100..105], b"hello");
	}

	#[test]
	fn unaligned_write_preserves_neighbours() {
		let mut br = image(2);
		br.seek(SeekFrom::Start(0)).unwrap();
		br.write_all(&[0x11u8; BS]).unwrap();
		br.seek(SeekFrom::Start(64)).unwrap();
		br.write_all(&[0x22u8; 64]).unwrap();
		let img = br.inner.get_ref();
		assert_eq!(img[0..64], [0x11u8; 64]);
		assert_eq!(img[64..128], [0x22u8; 64]);
		assert_eq!(img[128..BS], [0x11u8; BS - 128]);
	}

	#[test]
	fn relative_seek_within_block() {
		let mut br = image(2);
		br.seek(SeekFrom::Start(BS as u64 + 8)).unwrap();
		let pos = br.seek(SeekFrom::Current(-4)).unwrap();
		assert_eq!(pos, BS as u64 + 4);
		let pos = br.seek(SeekFrom::Current(100)).unwrap();
		assert_eq!(pos, BS as u64 + 104);
	}

	#[test]
	fn negative_absolute_seek_fails() {
		let mut br = image(2);
		br.seek(SeekFrom::Start(4)).unwrap();
		let e = br.seek(SeekFrom::Current(-100)).unwrap_err();
		assert_eq!(e.raw_os_error(), Some(libc::EINVAL));
	}
}
