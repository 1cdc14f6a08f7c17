use std::io::Result as IoResult;

use super::Sfs;
use crate::{blockreader::Backend, data::*, err};

impl<R: Backend> Sfs<R> {
	/// Persist an entry (with its continuations) at its image offset.
	pub(super) fn write_entry(&mut self, e: &Entry) -> IoResult<()> {
		log::trace!("write_entry: type {:#04x} at {:#08x}", e.tag(), e.offset);
		self.file.write_at(e.offset, &e.encode())
	}

	/// Rebuild the on-disk record of `entries[i]` from its payload.
	pub(super) fn rewrite(&mut self, i: usize) -> IoResult<()> {
		let buf = self.entries[i].encode();
		let offset = self.entries[i].offset;
		log::trace!(
			"rewrite: type {:#04x} at {offset:#08x}",
			self.entries[i].tag()
		);
		self.file.write_at(offset, &buf)
	}

	/// Write `n` Unused slots starting at `offset` and mirror them in the
	/// list at position `at`.
	fn insert_unused(&mut self, at: usize, offset: u64, n: usize) -> IoResult<()> {
		for i in 0..n {
			let e = Entry {
				offset: offset + (ENTRY_SIZE * i) as u64,
				kind:   EntryKind::Unused,
			};
			self.write_entry(&e)?;
			self.entries.insert(at + i, e);
		}
		Ok(())
	}

	/// Place a new entry in a contiguous run of reusable slots (Unused
	/// entries and tombstones). Tombstoned files in the run release their
	/// data blocks to the free list; leftover slots of the run are padded
	/// with Unused entries. Fails with `ENOSPC` when no run is big enough.
	pub(super) fn insert_entry(&mut self, kind: &EntryKind) -> IoResult<()> {
		let new = Entry {
			offset: 0,
			kind:   kind.clone(),
		};
		let needed = 1 + new.num_cont() as usize;
		log::trace!("insert_entry: needs {needed} slots");

		let mut run_start = None;
		let mut found = 0usize;
		for i in 0..self.entries.len() {
			let usable = self.entries[i].usable_slots();
			if usable == 0 {
				run_start = None;
				found = 0;
				continue;
			}
			if run_start.is_none() {
				run_start = Some(i);
			}
			found += usable;
			if found < needed {
				continue;
			}

			let rs = run_start.unwrap();
			let start_offset = self.entries[rs].offset;
			for e in &self.entries[rs..=i] {
				if matches!(e.kind, EntryKind::FileDel(_)) {
					self.free.tombstone_to_normal(e.offset);
				}
			}
			self.entries.drain(rs..=i);

			// pad the leftover slots, then the entry itself
			let pad_offset = start_offset + (ENTRY_SIZE * needed) as u64;
			self.insert_unused(rs, pad_offset, found - needed)?;
			let e = Entry {
				offset: start_offset,
				kind:   new.kind,
			};
			self.write_entry(&e)?;
			self.entries.insert(rs, e);
			return Ok(());
		}

		log::trace!("insert_entry: no run of {needed} reusable slots");
		Err(err!(ENOSPC))
	}

	/// Grow the Index Area toward the superblock: the Start Marker moves
	/// down by the entry's size and the new entry takes its former place.
	/// Writes the entry, then the Start Marker, then the superblock.
	pub(super) fn prepend_entry(&mut self, kind: EntryKind) -> IoResult<()> {
		let new = Entry {
			offset: 0,
			kind,
		};
		let size = new.bytes() as u64;
		let bs = self.sb.block_bytes();

		if self.free.last().length * bs < size {
			log::error!("prepend_entry: index area cannot grow, image is full");
			return Err(err!(ENOSPC));
		}
		let new_isz = self.sb.index_size + size;
		let slack = self.sb.index_size.div_ceil(bs) * bs;
		if new_isz > slack {
			// the index spills into fresh blocks taken off the free tail
			if new_isz - slack > self.free.last().length * bs {
				return Err(err!(ENOSPC));
			}
			self.free.shrink_tail((new_isz - slack).div_ceil(bs));
		}

		self.entries[0].offset -= size;
		let new = Entry {
			offset: self.entries[0].offset + ENTRY_SIZE as u64,
			kind:   new.kind,
		};
		self.write_entry(&new)?;
		let start = self.entries[0].clone();
		self.write_entry(&start)?;
		self.sb.index_size = new_isz;
		self.write_super()?;
		self.entries.insert(1, new);
		Ok(())
	}

	/// Replace `entries[i]` with Unused slots, offsets preserved.
	pub(super) fn delete_entry(&mut self, i: usize) -> IoResult<()> {
		let e = self.entries.remove(i);
		log::trace!("delete_entry: type {:#04x} at {:#08x}", e.tag(), e.offset);
		self.insert_unused(i, e.offset, 1 + e.num_cont() as usize)
	}

	/// Purge the File-deleted entry at image offset `off`. Called when
	/// its data blocks get reassigned through the free list.
	pub(super) fn purge_tombstone(&mut self, off: u64) -> IoResult<()> {
		let i = self
			.entries
			.iter()
			.position(|e| e.offset == off && matches!(e.kind, EntryKind::FileDel(_)))
			.unwrap_or_else(|| panic!("no tombstone entry at {off:#x}"));
		self.delete_entry(i)
	}

	/// Store a new entry, reusing slots when possible and growing the
	/// Index Area otherwise.
	pub(super) fn put_new_entry(&mut self, kind: EntryKind) -> IoResult<()> {
		match self.insert_entry(&kind) {
			Err(e) if e.raw_os_error() == Some(libc::ENOSPC) => self.prepend_entry(kind),
			r => r,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::super::tests::scratch;

	/// A fresh image has no reusable slots, so the first create grows the
	/// Index Area: the Start Marker moves down one slot and the
	/// superblock follows.
	#[test]
	fn index_growth_moves_the_start_marker() {
		let mut sfs = scratch(64);
		let start0 = sfs.entries[0].offset;
		let isz0 = sfs.sb.index_size;
		let tail0 = sfs.free.last().length;

		sfs.mkdir("d").unwrap();
		sfs.check().unwrap();

		assert_eq!(sfs.entries[0].offset, start0 - 64);
		assert_eq!(sfs.sb.index_size, isz0 + 64);
		// 192 bytes still fit in the index's single block
		assert_eq!(sfs.free.last().length, tail0);

		// the superblock checksum stays valid across the growth
		let img = sfs.into_inner();
		let sfs = crate::Sfs::new(crate::BlockReader::new(img, 512, true)).unwrap();
		assert!(sfs.is_dir("d"));
	}

	/// Index growth past a block boundary takes a block off the free tail.
	#[test]
	fn index_growth_consumes_tail_blocks() {
		let mut sfs = scratch(64);
		let tail0 = sfs.free.last().length;

		// 2 entries * 64 bytes exist; 6 more fill the first index block
		for i in 0..6 {
			sfs.create(&format!("f{i}")).unwrap();
		}
		assert_eq!(sfs.free.last().length, tail0);
		sfs.create("spill").unwrap();
		sfs.check().unwrap();
		assert_eq!(sfs.sb.index_size, 9 * 64);
		assert_eq!(sfs.free.last().length, tail0 - 1);
	}

	#[test]
	fn deleted_slots_are_reused_in_place() {
		let mut sfs = scratch(64);
		sfs.create("a").unwrap();
		sfs.create("b").unwrap();
		let isz = sfs.sb.index_size;
		let a_off = sfs.find_file("a").map(|i| sfs.entries[i].offset).unwrap();

		sfs.delete("a").unwrap();
		sfs.create("c").unwrap();
		sfs.check().unwrap();

		// "c" reuses "a"'s slot instead of growing the index
		assert_eq!(sfs.sb.index_size, isz);
		let c_off = sfs.find_file("c").map(|i| sfs.entries[i].offset).unwrap();
		assert_eq!(c_off, a_off);
	}

	/// A long name needs a run of slots; two adjacent one-slot holes
	/// merge, and the leftover is padded with Unused entries.
	#[test]
	fn runs_of_holes_merge_and_pad() {
		let mut sfs = scratch(64);
		sfs.create("a").unwrap();
		sfs.create("b").unwrap();
		sfs.create("c").unwrap();
		sfs.delete("a").unwrap();
		sfs.delete("b").unwrap();
		let isz = sfs.sb.index_size;

		// 30-byte name -> 1 continuation -> 2 slots
		let long = "l".repeat(30);
		sfs.create(&long).unwrap();
		sfs.check().unwrap();
		assert_eq!(sfs.sb.index_size, isz);
		assert!(sfs.is_file(&long));
		assert!(sfs.is_file("c"));
	}
}
