use std::io::Result as IoResult;

use super::Sfs;
use crate::{blockreader::Backend, data::*, entry::num_cont_for_name, err, time};

impl<R: Backend> Sfs<R> {
	/// Create an empty file. The sentinel block range
	/// `[rsvd_blocks, rsvd_blocks - 1]` marks a file without blocks.
	pub fn create(&mut self, path: &str) -> IoResult<()> {
		log::trace!("create({path:?});");
		self.assert_rw()?;
		self.check_new_name(path)?;
		if path.len() > FILE_NAME_LEN + 255 * ENTRY_SIZE {
			return Err(err!(ENAMETOOLONG));
		}
		let f = FileData {
			num_cont:    num_cont_for_name(FILE_NAME_LEN, path.len()),
			time_stamp:  time::now(),
			start_block: self.sb.first_data_block(),
			end_block:   self.sb.first_data_block() - 1,
			file_len:    0,
			name:        path.to_string(),
		};
		self.put_new_entry(EntryKind::File(f))
	}

	/// Read into `buf` at `offset`, clamped to the end of the file.
	pub fn read(&mut self, path: &str, buf: &mut [u8], offset: u64) -> IoResult<usize> {
		log::trace!("read({path:?}, {}, {offset});", buf.len());
		let i = self.find_file(path).ok_or(err!(ENOENT))?;
		let EntryKind::File(f) = &self.entries[i].kind else {
			unreachable!()
		};
		if offset >= f.file_len {
			return Ok(0);
		}
		let sz = buf.len().min((f.file_len - offset) as usize);
		let pos = f.start_block * self.sb.block_bytes() + offset;
		self.file.read_at(pos, &mut buf[..sz])?;
		Ok(sz)
	}

	/// Write `buf` at `offset`, truncated to the current end of the file;
	/// growing a file takes a `resize` first. An offset past the end is
	/// rejected.
	pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> IoResult<usize> {
		log::trace!("write({path:?}, {}, {offset});", buf.len());
		self.assert_rw()?;
		let i = self.find_file(path).ok_or(err!(ENOENT))?;
		let EntryKind::File(f) = &self.entries[i].kind else {
			unreachable!()
		};
		if offset > f.file_len {
			return Err(err!(EINVAL));
		}
		let sz = buf.len().min((f.file_len - offset) as usize);
		if sz == 0 {
			return Ok(0);
		}
		let pos = f.start_block * self.sb.block_bytes() + offset;
		self.file.write_at(pos, &buf[..sz])?;
		Ok(sz)
	}

	/// Change the size of a file.
	///
	/// Growing extends the block range in place when the blocks right
	/// after the file are free, and relocates the file otherwise;
	/// shrinking releases the surplus blocks. Newly visible bytes are
	/// zero-filled.
	pub fn resize(&mut self, path: &str, new_len: u64) -> IoResult<()> {
		log::trace!("resize({path:?}, {new_len});");
		self.assert_rw()?;
		let i = self.find_file(path).ok_or(err!(ENOENT))?;
		let EntryKind::File(f) = &self.entries[i].kind else {
			unreachable!()
		};
		let bs = self.sb.block_bytes();
		let l0 = f.file_len;
		let l1 = new_len;
		let b0 = l0.div_ceil(bs);
		let b1 = l1.div_ceil(bs);
		let s0 = f.start_block;

		let s1 = if b1 > b0 {
			let right_after = self
				.free
				.find(s0 + b0, b1 - b0)
				.filter(|&n| self.free.nodes()[n].start_block == s0 + b0);
			match right_after {
				Some(n) => {
					// the blocks following the file are free: extend in place
					self.free_del(n, b1 - b0)?;
					s0
				}
				None => self.relocate(s0, b0, b1)?,
			}
		} else if b0 > b1 {
			self.free.add(s0 + b1, b0 - b1);
			s0
		} else {
			s0
		};

		if l1 > l0 {
			self.file.fill_at(s1 * bs + l0, 0u8, l1 - l0)?;
		}

		let EntryKind::File(f) = &mut self.entries[i].kind else {
			unreachable!()
		};
		f.file_len = l1;
		f.start_block = if b1 == 0 { self.sb.first_data_block() } else { s1 };
		f.end_block = f.start_block + b1 - 1;
		self.rewrite(i)
	}

	/// Move a file's `b0` blocks at `s0` to the first fit of `b1` blocks.
	/// Its own blocks join the candidates. Returns the new start block.
	fn relocate(&mut self, s0: u64, b0: u64, b1: u64) -> IoResult<u64> {
		// dry run first, so a full image leaves the lists untouched
		let mut trial = self.free.clone();
		trial.add(s0, b0);
		if trial.find(0, b1).is_none() {
			log::error!("resize: no room for {b1} blocks");
			return Err(err!(ENOSPC));
		}

		self.free.add(s0, b0);
		let n = match self.free.find(0, b1) {
			Some(n) => n,
			None => unreachable!(),
		};
		let s1 = self.free.nodes()[n].start_block;
		self.free_del(n, b1)?;
		log::trace!("resize: relocating {b0} blocks from {s0} to {s1}");

		let bs = self.sb.block_bytes();
		let mut block = vec![0u8; bs as usize];
		for k in 0..b0 {
			self.file.read_at((s0 + k) * bs, &mut block)?;
			self.file.write_at((s1 + k) * bs, &block)?;
		}
		Ok(s1)
	}

	/// Delete a file. A non-empty file turns into a File-deleted
	/// tombstone that keeps owning its blocks through the free list; an
	/// empty one releases its slots right away.
	pub fn delete(&mut self, path: &str) -> IoResult<()> {
		log::trace!("delete({path:?});");
		self.assert_rw()?;
		if self.find_dir(path).is_some() {
			return Err(err!(EISDIR));
		}
		let i = self.find_file(path).ok_or(err!(ENOENT))?;
		let EntryKind::File(f) = &self.entries[i].kind else {
			unreachable!()
		};

		if f.file_len == 0 {
			return self.delete_entry(i);
		}

		let (start, blocks) = (f.start_block, f.file_len.div_ceil(self.sb.block_bytes()));
		let data = f.clone();
		let offset = self.entries[i].offset;
		self.entries[i].kind = EntryKind::FileDel(data);
		self.free.insert_tombstone(start, blocks, offset);
		self.rewrite(i)
	}
}
