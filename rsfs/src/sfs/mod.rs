use std::{
	fs::File,
	io::{Cursor, Error as IoError, ErrorKind, Result as IoResult},
	path::Path,
	time::SystemTime,
};

mod dir;
mod file;
mod freelist;
mod index;

use crate::{
	blockreader::{Backend, BlockReader},
	data::*,
	decoder::{Config, Decoder},
	entry, time,
};
use freelist::FreeList;

/// (INTERNAL) Constructs an [`std::io::Error`] from an `errno`.
#[macro_export]
macro_rules! err {
	($name:ident) => {
		std::io::Error::from_raw_os_error(libc::$name)
	};
}

macro_rules! iobail {
	($kind:expr, $($tk:tt)+) => {
		return Err(IoError::new($kind, format!($($tk)+)))
	};
}

/// Options for [`Sfs::format`].
#[derive(Debug, Clone)]
pub struct FormatOpts {
	/// Total size of the image in blocks.
	pub total_blocks: u64,

	/// Block size exponent; block bytes = `1 << (n + 7)`.
	pub block_size: u8,

	/// Blocks reserved at the start of the image, superblock included.
	pub rsvd_blocks: u32,

	/// Volume label, at most 52 bytes.
	pub label: String,
}

impl Default for FormatOpts {
	fn default() -> Self {
		Self {
			total_blocks: 2880,
			block_size:   2, // 512-byte blocks
			rsvd_blocks:  1,
			label:        String::new(),
		}
	}
}

/// An open Simple File System image.
///
/// The handle owns the image exclusively. All paths passed in are
/// normalized: no leading slash, no trailing slash, `/` separators.
/// Dropping the handle closes the image.
#[derive(Debug)]
pub struct Sfs<R: Backend> {
	file:     Decoder<BlockReader<R>>,
	sb:       Super,
	entries:  Vec<Entry>,
	free:     FreeList,
	iter_pos: usize,
}

impl Sfs<File> {
	pub fn open(path: &Path, rw: bool) -> IoResult<Self> {
		let file = BlockReader::open(path, rw)?;
		Self::new(file)
	}
}

impl<R: Backend> Sfs<R> {
	pub fn new(file: BlockReader<R>) -> IoResult<Self> {
		Self::load(Decoder::new(file, Config::little()))
	}

	/// Create a fresh filesystem on `backend` and open it. The backend
	/// must already have `total_blocks * block_bytes` bytes.
	pub fn format(backend: R, opts: &FormatOpts) -> IoResult<Self> {
		let bs = 1u64 << (opts.block_size + 7);
		let index_size = 2 * ENTRY_SIZE as u64;
		if opts.label.len() > VOL_NAME_LEN {
			return Err(err!(EINVAL));
		}
		if (opts.rsvd_blocks as u64) * bs < SUPER_START + SUPER_SIZE as u64 {
			return Err(err!(EINVAL));
		}
		if opts.total_blocks <= opts.rsvd_blocks as u64 + 1 {
			return Err(err!(EINVAL));
		}

		let mut file = Decoder::new(BlockReader::new(backend, bs as usize, true), Config::little());
		let now = time::now();
		let total = opts.total_blocks * bs;

		file.fill_at(0, 0u8, opts.rsvd_blocks as u64 * bs)?;

		let start = Entry {
			offset: total - index_size,
			kind:   EntryKind::Start,
		};
		let volume = Entry {
			offset: total - ENTRY_SIZE as u64,
			kind:   EntryKind::Volume(VolumeData {
				time_stamp: now,
				name:       opts.label.clone(),
			}),
		};
		file.write_at(start.offset, &start.encode())?;
		file.write_at(volume.offset, &volume.encode())?;

		let mut sb = Super {
			time_stamp: now,
			data_size: (opts.total_blocks - opts.rsvd_blocks as u64) * bs - index_size,
			index_size,
			magic: SFS_MAGIC,
			version: SFS_VERSION,
			total_blocks: opts.total_blocks,
			rsvd_blocks: opts.rsvd_blocks,
			block_size: opts.block_size,
			crc: 0,
		};
		write_super(&mut file, &mut sb)?;

		Self::load(file)
	}

	fn load(mut file: Decoder<BlockReader<R>>) -> IoResult<Self> {
		let sb = read_super(&mut file)?;
		log::debug!("Superblock: {sb:#?}");

		let total = sb.total_bytes();
		file.seek(sb.index_start())?;
		let mut entries = Vec::new();
		loop {
			let offset = file.pos()?;
			if offset + ENTRY_SIZE as u64 > total {
				iobail!(ErrorKind::InvalidData, "index area has no volume entry");
			}
			let e = read_entry(&mut file, offset)?;
			let done = matches!(e.kind, EntryKind::Volume(_));
			entries.push(e);
			if done {
				break;
			}
		}
		if !matches!(entries[0].kind, EntryKind::Start) {
			iobail!(
				ErrorKind::InvalidData,
				"index area does not begin with the start marker"
			);
		}

		let free = FreeList::build(&entries, sb.first_data_block(), sb.data_blocks());
		let s = Self {
			file,
			sb,
			entries,
			free,
			iter_pos: 0,
		};
		s.check()?;

		log::info!("Summary:");
		log::info!("Block Size: {}", s.sb.block_bytes());
		log::info!("# Blocks: {}", s.sb.total_blocks);
		log::info!("Index Size: {}", s.sb.index_size);
		log::info!("# Entries: {}", s.entries.len());
		log::info!("Volume: {:?}", s.label());
		Ok(s)
	}

	pub fn write_enabled(&self) -> bool {
		self.file.inner().write_enabled()
	}

	/// Consume the handle and hand back the underlying backend.
	pub fn into_inner(self) -> R {
		self.file.into_inner().into_inner()
	}

	pub(crate) fn assert_rw(&self) -> IoResult<()> {
		if self.write_enabled() {
			Ok(())
		} else {
			Err(err!(EROFS))
		}
	}

	pub(crate) fn write_super(&mut self) -> IoResult<()> {
		write_super(&mut self.file, &mut self.sb)
	}

	/// Get filesystem metadata.
	#[doc(alias("statfs", "statvfs"))]
	pub fn info(&self) -> Info {
		let sb = &self.sb;
		let bfree = self
			.free
			.nodes()
			.iter()
			.filter(|n| n.delfile.is_none())
			.map(|n| n.length)
			.sum();
		let files = self
			.entries
			.iter()
			.filter(|e| matches!(e.kind, EntryKind::File(_)))
			.count() as u64;
		let ffree = self.entries.iter().map(|e| e.usable_slots() as u64).sum();
		Info {
			blocks: sb.data_blocks() - sb.first_data_block(),
			bfree,
			files,
			ffree,
			bsize: sb.block_bytes(),
		}
	}

	/// Volume label from the Volume ID entry.
	pub fn label(&self) -> &str {
		match self.entries.last().map(|e| &e.kind) {
			Some(EntryKind::Volume(v)) => &v.name,
			_ => "",
		}
	}

	/* lookups; tombstoned entries are invisible */

	pub(crate) fn find_dir(&self, path: &str) -> Option<usize> {
		self.entries.iter().position(
			|e| matches!(&e.kind, EntryKind::Dir(d) if d.name == path),
		)
	}

	pub(crate) fn find_file(&self, path: &str) -> Option<usize> {
		self.entries.iter().position(
			|e| matches!(&e.kind, EntryKind::File(f) if f.name == path),
		)
	}

	pub(crate) fn find_any(&self, path: &str) -> Option<usize> {
		self.entries.iter().position(|e| {
			matches!(&e.kind, EntryKind::Dir(d) if d.name == path)
				|| matches!(&e.kind, EntryKind::File(f) if f.name == path)
		})
	}

	pub fn is_dir(&self, path: &str) -> bool {
		self.find_dir(path).is_some()
	}

	pub fn is_file(&self, path: &str) -> bool {
		self.find_file(path).is_some()
	}

	/// Size of the file at `path`, or 0 if there is no such file.
	pub fn get_file_size(&self, path: &str) -> u64 {
		match self.find_file(path) {
			Some(i) => match &self.entries[i].kind {
				EntryKind::File(f) => f.file_len,
				_ => 0,
			},
			None => 0,
		}
	}

	/// Validate `path` as the name of a new entry: non-empty basename and
	/// an existing parent directory. Does not check for collisions.
	pub(crate) fn check_new_path(&self, path: &str) -> IoResult<()> {
		if basename(path).is_empty() || path.contains('\0') {
			return Err(err!(EINVAL));
		}
		if let Some(parent) = parent_of(path) {
			if self.find_dir(parent).is_none() {
				return Err(err!(ENOENT));
			}
		}
		Ok(())
	}

	/// Like [`Self::check_new_path`], but also rejects collisions.
	pub(crate) fn check_new_name(&self, path: &str) -> IoResult<()> {
		if self.find_any(path).is_some() {
			return Err(err!(EEXIST));
		}
		self.check_new_path(path)
	}

	/* directory enumeration */

	/// Start enumerating the children of `path` (the root for an empty
	/// path) and yield the first basename. No mutating call may be made
	/// between `first` and the `next` calls that follow it.
	pub fn first(&mut self, path: &str) -> Option<String> {
		self.iter_pos = 0;
		self.advance(path)
	}

	/// Yield the next child basename, or `None` at the end.
	pub fn next(&mut self, path: &str) -> Option<String> {
		self.advance(path)
	}

	fn advance(&mut self, path: &str) -> Option<String> {
		while self.iter_pos < self.entries.len() {
			let e = &self.entries[self.iter_pos];
			self.iter_pos += 1;
			let name = match &e.kind {
				EntryKind::Dir(d) => &d.name,
				EntryKind::File(f) => &f.name,
				_ => continue,
			};
			if is_child_of(path, name) {
				return Some(basename(name).to_string());
			}
		}
		None
	}

	/* timestamps */

	/// Time the volume was last changed.
	pub fn sfs_time(&self) -> SystemTime {
		time::to_system(self.sb.time_stamp)
	}

	pub fn dir_time(&self, path: &str) -> IoResult<SystemTime> {
		let i = self.find_dir(path).ok_or(err!(ENOENT))?;
		match &self.entries[i].kind {
			EntryKind::Dir(d) => Ok(time::to_system(d.time_stamp)),
			_ => unreachable!(),
		}
	}

	pub fn file_time(&self, path: &str) -> IoResult<SystemTime> {
		let i = self.find_file(path).ok_or(err!(ENOENT))?;
		match &self.entries[i].kind {
			EntryKind::File(f) => Ok(time::to_system(f.time_stamp)),
			_ => unreachable!(),
		}
	}

	pub fn set_time(&mut self, path: &str, t: SystemTime) -> IoResult<()> {
		log::trace!("set_time({path:?});");
		self.assert_rw()?;
		let i = self.find_any(path).ok_or(err!(ENOENT))?;
		let ts = time::from_system(t);
		match &mut self.entries[i].kind {
			EntryKind::Dir(d) => d.time_stamp = ts,
			EntryKind::File(f) => f.time_stamp = ts,
			_ => unreachable!(),
		}
		self.rewrite(i)
	}

	/// Verify the derived state: entry offsets are contiguous and sized
	/// to `index_size`, every Data Area block is accounted for exactly
	/// once, pure-free ranges are maximally coalesced, and tombstones
	/// and their free-list nodes pair up one to one.
	pub fn check(&self) -> IoResult<()> {
		macro_rules! fsck {
			($e:expr, $($tk:tt)+) => {
				if !($e) {
					log::error!($($tk)+);
					return Err(IoError::new(ErrorKind::InvalidData, format!($($tk)+)));
				}
			};
		}

		let sb = &self.sb;
		let bs = sb.block_bytes();
		let first = sb.first_data_block();
		let end = sb.data_blocks();

		fsck!(self.entries.len() >= 2, "index area too short");
		fsck!(
			matches!(self.entries[0].kind, EntryKind::Start),
			"first entry is not the start marker"
		);
		fsck!(
			matches!(self.entries.last().map(|e| &e.kind), Some(EntryKind::Volume(_))),
			"last entry is not the volume id"
		);

		let mut off = sb.index_start();
		for e in &self.entries {
			fsck!(
				e.offset == off,
				"entry offsets not contiguous at {:#x}",
				e.offset
			);
			off += e.bytes() as u64;
		}
		fsck!(off == sb.total_bytes(), "index area does not end the image");
		fsck!(
			off - sb.index_start() == sb.index_size,
			"super.index_size {} does not match the entries",
			sb.index_size
		);

		// every data block belongs to exactly one of: a live file, an
		// unusable range, or a free-list node
		struct Seg {
			start: u64,
			len:   u64,
			free:  bool,
			tomb:  Option<u64>,
		}
		let mut segs = Vec::new();
		let mut tombs = Vec::new();
		for e in &self.entries {
			match &e.kind {
				EntryKind::File(f) => {
					if f.file_len == 0 {
						fsck!(
							f.end_block + 1 == f.start_block,
							"empty file {:?} has a block range",
							f.name
						);
						continue;
					}
					let blocks = f.end_block + 1 - f.start_block;
					fsck!(
						f.start_block >= first && f.end_block < end,
						"file {:?} lies outside the data area",
						f.name
					);
					fsck!(
						blocks * bs >= f.file_len,
						"file {:?} is longer than its blocks",
						f.name
					);
					segs.push(Seg {
						start: f.start_block,
						len:   blocks,
						free:  false,
						tomb:  None,
					});
				}
				EntryKind::Unusable(u) => segs.push(Seg {
					start: u.start_block,
					len:   u.end_block + 1 - u.start_block,
					free:  false,
					tomb:  None,
				}),
				EntryKind::FileDel(f) => {
					tombs.push((e.offset, f.start_block, f.end_block + 1 - f.start_block))
				}
				_ => {}
			}
		}
		for n in self.free.nodes() {
			segs.push(Seg {
				start: n.start_block,
				len:   n.length,
				free:  n.delfile.is_none(),
				tomb:  n.delfile,
			});
		}
		segs.sort_unstable_by_key(|s| s.start);

		let mut cursor = first;
		let mut prev_free = false;
		for s in &segs {
			fsck!(
				s.start == cursor,
				"block accounting broken at block {} (expected {})",
				s.start,
				cursor
			);
			fsck!(
				!(prev_free && s.free),
				"two adjacent pure-free ranges at block {}",
				s.start
			);
			cursor += s.len;
			prev_free = s.free;
		}
		fsck!(
			cursor == end,
			"data area accounting ends at {} instead of {}",
			cursor,
			end
		);

		// tombstones and delfile nodes pair up 1:1
		fsck!(
			tombs.len() == segs.iter().filter(|s| s.tomb.is_some()).count(),
			"tombstone / free node count mismatch"
		);
		for (off, start, len) in &tombs {
			fsck!(
				segs.iter()
					.any(|s| s.tomb == Some(*off) && s.start == *start && s.len == *len),
				"deleted file at {off:#x} has no matching free node"
			);
		}

		Ok(())
	}
}

fn read_super<R: Backend>(file: &mut Decoder<BlockReader<R>>) -> IoResult<Super> {
	let mut buf = [0u8; SUPER_SIZE];
	file.read_at(SUPER_START, &mut buf)?;
	let sb: Super = Decoder::new(Cursor::new(&buf[..]), Config::little()).decode()?;
	if sb.magic != SFS_MAGIC {
		iobail!(
			ErrorKind::InvalidData,
			"invalid superblock magic: {:?}",
			sb.magic
		);
	}
	if sb.version != SFS_VERSION {
		iobail!(
			ErrorKind::InvalidData,
			"unsupported version: {:#04x}",
			sb.version
		);
	}
	if !entry::checksum_ok(&buf[24..]) {
		iobail!(ErrorKind::InvalidData, "superblock checksum error");
	}

	macro_rules! sbassert {
		($e:expr) => {
			if !($e) {
				log::error!("superblock corrupted: {}", stringify!($e));
				return Err(err!(EIO));
			}
		};
	}
	sbassert!(sb.total_blocks > 0);
	sbassert!(sb.rsvd_blocks >= 1);
	sbassert!(sb.total_blocks < 1 << 48);
	sbassert!((sb.rsvd_blocks as u64) < sb.total_blocks);
	sbassert!(sb.index_size >= 2 * ENTRY_SIZE as u64);
	sbassert!(sb.index_size % ENTRY_SIZE as u64 == 0);
	sbassert!(sb.index_size <= sb.total_bytes() - sb.rsvd_blocks as u64 * sb.block_bytes());

	Ok(sb)
}

/// Refresh the timestamp, recompute the checksum and write the record back.
fn write_super<R: Backend>(file: &mut Decoder<BlockReader<R>>, sb: &mut Super) -> IoResult<()> {
	sb.time_stamp = time::now();
	sb.crc = 0;
	let mut buf = file.config().encode_to_vec(sb)?;
	debug_assert_eq!(buf.len(), SUPER_SIZE);
	buf[SUPER_SIZE - 1] = entry::checksum(&buf[24..SUPER_SIZE - 1]);
	sb.crc = buf[SUPER_SIZE - 1];
	file.write_at(SUPER_START, &buf)
}

/// Read one entry (with its continuations) at the current position.
fn read_entry<R: Backend>(file: &mut Decoder<BlockReader<R>>, offset: u64) -> IoResult<Entry> {
	let mut buf = vec![0u8; ENTRY_SIZE];
	file.read(&mut buf)?;
	if matches!(
		buf[0],
		ENTRY_DIR | ENTRY_FILE | ENTRY_DIR_DEL | ENTRY_FILE_DEL
	) {
		let cont = buf[2] as usize;
		buf.resize((1 + cont) * ENTRY_SIZE, 0u8);
		file.read(&mut buf[ENTRY_SIZE..])?;
	}
	Entry::decode(&buf, offset)
}

pub(crate) fn basename(path: &str) -> &str {
	match path.rfind('/') {
		Some(i) => &path[i + 1..],
		None => path,
	}
}

pub(crate) fn parent_of(path: &str) -> Option<&str> {
	path.rfind('/').map(|i| &path[..i])
}

/// Does `name` denote a direct child of directory `dir`?
fn is_child_of(dir: &str, name: &str) -> bool {
	if dir.is_empty() {
		return !name.contains('/');
	}
	name.len() > dir.len() + 1
		&& name.starts_with(dir)
		&& name.as_bytes()[dir.len()] == b'/'
		&& !name[dir.len() + 1..].contains('/')
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	pub(crate) fn scratch(total_blocks: u64) -> Sfs<Cursor<Vec<u8>>> {
		let opts = FormatOpts {
			total_blocks,
			label: "scratch".into(),
			..FormatOpts::default()
		};
		let img = Cursor::new(vec![0u8; (total_blocks * 512) as usize]);
		Sfs::format(img, &opts).unwrap()
	}

	#[test]
	fn format_and_reload() {
		let sfs = scratch(64);
		assert_eq!(sfs.label(), "scratch");
		assert_eq!(sfs.sb.index_size, 128);
		assert_eq!(sfs.entries.len(), 2);
		assert!(!sfs.is_dir("anything"));

		// a freshly formatted image survives a reload
		let img = sfs.into_inner();
		let sfs = Sfs::new(BlockReader::new(img, 512, true)).unwrap();
		assert_eq!(sfs.label(), "scratch");
		sfs.check().unwrap();
	}

	#[test]
	fn format_rejects_nonsense() {
		let img = || Cursor::new(vec![0u8; 64 * 512]);
		let long_label = FormatOpts {
			label: "x".repeat(VOL_NAME_LEN + 1),
			..FormatOpts::default()
		};
		assert!(Sfs::format(img(), &long_label).is_err());
		let tiny = FormatOpts {
			total_blocks: 2,
			..FormatOpts::default()
		};
		assert!(Sfs::format(img(), &tiny).is_err());
	}

	#[test]
	fn corrupt_magic_is_fatal() {
		let sfs = scratch(64);
		let mut img = sfs.into_inner().into_inner();
		img[SUPER_START as usize + 24] = b'X';
		let e = Sfs::new(BlockReader::new(Cursor::new(img), 512, true)).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn corrupt_checksum_is_fatal() {
		let sfs = scratch(64);
		let mut img = sfs.into_inner().into_inner();
		img[SUPER_START as usize + 28] ^= 0xff;
		assert!(Sfs::new(BlockReader::new(Cursor::new(img), 512, true)).is_err());
	}

	#[test]
	fn children_matching() {
		assert!(is_child_of("", "top"));
		assert!(!is_child_of("", "d/x"));
		assert!(is_child_of("d", "d/x"));
		assert!(!is_child_of("d", "d"));
		assert!(!is_child_of("d", "dd/x"));
		assert!(!is_child_of("d", "d/x/y"));
	}

	#[test]
	fn path_helpers() {
		assert_eq!(basename("a/b/c"), "c");
		assert_eq!(basename("c"), "c");
		assert_eq!(parent_of("a/b/c"), Some("a/b"));
		assert_eq!(parent_of("c"), None);
	}
}
