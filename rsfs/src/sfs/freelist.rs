use std::io::Result as IoResult;

use super::Sfs;
use crate::{blockreader::Backend, data::*, err};

/// A range of Data Area blocks: pure-free when `delfile` is `None`,
/// otherwise still holding the content of the deleted file whose index
/// entry lives at offset `delfile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FreeNode {
	pub start_block: u64,
	pub length:      u64,
	pub delfile:     Option<u64>,
}

/// The free-space list, sorted ascending by `start_block`.
///
/// Two pure-free nodes never abut; the final node covers the tail of the
/// Data Area up to the first Index Area block and may have length zero
/// when the image is full.
#[derive(Debug, Clone)]
pub(crate) struct FreeList {
	nodes: Vec<FreeNode>,
}

impl FreeList {
	/// Derive the list from the entry list: every gap between occupied
	/// ranges becomes a pure-free node, every deleted file keeps a node
	/// of its own.
	pub fn build(entries: &[Entry], first_block: u64, data_blocks: u64) -> Self {
		let mut occ = Vec::new();
		for e in entries {
			match &e.kind {
				EntryKind::File(f) if f.file_len > 0 => occ.push(FreeNode {
					start_block: f.start_block,
					length:      f.end_block + 1 - f.start_block,
					delfile:     None,
				}),
				EntryKind::Unusable(u) => occ.push(FreeNode {
					start_block: u.start_block,
					length:      u.end_block + 1 - u.start_block,
					delfile:     None,
				}),
				EntryKind::FileDel(f) => occ.push(FreeNode {
					start_block: f.start_block,
					length:      f.end_block + 1 - f.start_block,
					delfile:     Some(e.offset),
				}),
				_ => {}
			}
		}
		occ.sort_unstable_by_key(|n| n.start_block);

		let mut nodes = Vec::new();
		let mut cursor = first_block;
		for n in occ {
			if n.start_block > cursor {
				nodes.push(FreeNode {
					start_block: cursor,
					length:      n.start_block - cursor,
					delfile:     None,
				});
			}
			cursor = n.start_block + n.length;
			if n.delfile.is_some() {
				nodes.push(n);
			}
		}
		nodes.push(FreeNode {
			start_block: cursor,
			length:      data_blocks.saturating_sub(cursor),
			delfile:     None,
		});
		Self {
			nodes,
		}
	}

	pub fn nodes(&self) -> &[FreeNode] {
		&self.nodes
	}

	/// The tail node before the Index Area.
	pub fn last(&self) -> &FreeNode {
		self.nodes.last().expect("free list lost its tail node")
	}

	/// Take `blocks` off the tail when the Index Area grows into it.
	pub fn shrink_tail(&mut self, blocks: u64) {
		let last = self.nodes.last_mut().expect("free list lost its tail node");
		assert!(last.delfile.is_none() && last.length >= blocks);
		last.length -= blocks;
	}

	/// Find a run of adjacent nodes totalling at least `length` blocks,
	/// all starting at or after block `min_start`. Returns the index of
	/// the run's first node.
	pub fn find(&self, min_start: u64, length: u64) -> Option<usize> {
		let mut first = 0;
		let mut tot = 0u64;
		let mut next = 0u64;
		for (i, n) in self.nodes.iter().enumerate() {
			if tot >= length {
				break;
			}
			if next != n.start_block {
				first = i;
				tot = 0;
			}
			if n.start_block >= min_start {
				tot += n.length;
				next = n.start_block + n.length;
			}
		}
		(tot >= length).then_some(first)
	}

	/// Give `length` blocks starting at `start` back as pure-free space,
	/// merging with pure-free neighbours only; a new range may abut a
	/// tombstone node but never joins it.
	pub fn add(&mut self, start: u64, length: u64) {
		if length == 0 {
			return;
		}
		let pos = self.nodes.partition_point(|n| n.start_block < start);
		let merge_prev = pos > 0 && {
			let p = &self.nodes[pos - 1];
			p.delfile.is_none() && p.start_block + p.length == start
		};
		let merge_next = pos < self.nodes.len() && {
			let n = &self.nodes[pos];
			n.delfile.is_none() && start + length == n.start_block
		};
		match (merge_prev, merge_next) {
			(true, true) => {
				let next_len = self.nodes[pos].length;
				self.nodes[pos - 1].length += length + next_len;
				self.nodes.remove(pos);
			}
			(true, false) => self.nodes[pos - 1].length += length,
			(false, true) => {
				let n = &mut self.nodes[pos];
				n.start_block -= length;
				n.length += length;
			}
			(false, false) => self.nodes.insert(
				pos,
				FreeNode {
					start_block: start,
					length,
					delfile: None,
				},
			),
		}
	}

	/// Record the block range of a freshly deleted file.
	pub fn insert_tombstone(&mut self, start: u64, length: u64, delfile: u64) {
		let pos = self.nodes.partition_point(|n| n.start_block < start);
		self.nodes.insert(
			pos,
			FreeNode {
				start_block: start,
				length,
				delfile: Some(delfile),
			},
		);
	}

	/// The index entry at offset `delfile` is going away; its blocks
	/// become ordinary free space, coalescing with pure-free neighbours.
	/// A tombstone whose node is already gone is a no-op.
	pub fn tombstone_to_normal(&mut self, delfile: u64) {
		let Some(i) = self.nodes.iter().position(|n| n.delfile == Some(delfile)) else {
			return;
		};
		self.nodes[i].delfile = None;
		if i + 1 < self.nodes.len()
			&& self.nodes[i + 1].delfile.is_none()
			&& self.nodes[i].start_block + self.nodes[i].length == self.nodes[i + 1].start_block
		{
			self.nodes[i].length += self.nodes[i + 1].length;
			self.nodes.remove(i + 1);
		}
		if i > 0
			&& self.nodes[i - 1].delfile.is_none()
			&& self.nodes[i - 1].start_block + self.nodes[i - 1].length == self.nodes[i].start_block
		{
			self.nodes[i - 1].length += self.nodes[i].length;
			self.nodes.remove(i);
		}
	}
}

impl<R: Backend> Sfs<R> {
	/// Consume `length` blocks from the run of nodes beginning at `from`.
	/// Whole nodes are peeled first; the final node is trimmed from the
	/// front. Any tombstone whose blocks get consumed, even partially,
	/// has its index entry purged, so the pairing of deleted files and
	/// free nodes stays one to one.
	pub(super) fn free_del(&mut self, from: usize, length: u64) -> IoResult<()> {
		let mut rest = length;
		let mut i = from;
		while rest > 0 {
			if i >= self.free.nodes.len() {
				return Err(err!(ENOSPC));
			}
			let node = self.free.nodes[i].clone();
			// consuming the tail node exactly leaves it behind with
			// length zero; the list always ends with the tail
			let tail_exact = i + 1 == self.free.nodes.len() && node.length == rest;
			if node.length <= rest && !tail_exact {
				rest -= node.length;
				self.free.nodes.remove(i);
				if let Some(off) = node.delfile {
					self.purge_tombstone(off)?;
				}
			} else {
				let n = &mut self.free.nodes[i];
				n.start_block += rest;
				n.length -= rest;
				let delfile = n.delfile.take();
				rest = 0;
				if let Some(off) = delfile {
					self.purge_tombstone(off)?;
				}
			}
		}
		Ok(())
	}
}
