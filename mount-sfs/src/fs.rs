use std::{
	collections::HashMap,
	fs::File,
	io::{Error as IoError, Result as IoResult},
	path::Path,
	time::SystemTime,
};

use fuser::{FileAttr, FileType};
use rsfs::Sfs;

/// stat(2) reports blocks in 512-byte units.
const STAT_BLKSIZE: u64 = 512;

/// The bridge between the kernel's inode-number world and the SFS
/// core's path world.
///
/// SFS has no inodes; numbers are minted here the first time a path is
/// seen and remapped on rename. The root directory is inode 1 and maps
/// to the empty path.
pub struct Fs {
	pub sfs: Sfs<File>,
	uid:     u32,
	gid:     u32,
	paths:   HashMap<u64, String>,
	inos:    HashMap<String, u64>,
	next:    u64,
}

impl Fs {
	pub fn open(image: &Path, rw: bool) -> IoResult<Self> {
		let sfs = Sfs::open(image, rw)?;
		let uid = unsafe { libc::getuid() };
		let gid = unsafe { libc::getgid() };
		Ok(Self {
			sfs,
			uid,
			gid,
			paths: HashMap::from([(fuser::FUSE_ROOT_ID, String::new())]),
			inos: HashMap::from([(String::new(), fuser::FUSE_ROOT_ID)]),
			next: fuser::FUSE_ROOT_ID + 1,
		})
	}

	pub fn path_of(&self, ino: u64) -> IoResult<String> {
		self.paths
			.get(&ino)
			.cloned()
			.ok_or_else(|| IoError::from_raw_os_error(libc::ENOENT))
	}

	pub fn ino_of(&mut self, path: &str) -> u64 {
		if let Some(ino) = self.inos.get(path) {
			return *ino;
		}
		let ino = self.next;
		self.next += 1;
		self.inos.insert(path.to_string(), ino);
		self.paths.insert(ino, path.to_string());
		ino
	}

	pub fn forget_path(&mut self, path: &str) {
		if let Some(ino) = self.inos.remove(path) {
			self.paths.remove(&ino);
		}
	}

	/// Remap `src` and everything below it to `dst`.
	pub fn move_path(&mut self, src: &str, dst: &str) {
		let moved: Vec<String> = self
			.inos
			.keys()
			.filter(|p| {
				p.as_str() == src
					|| (p.len() > src.len()
						&& p.starts_with(src)
						&& p.as_bytes()[src.len()] == b'/')
			})
			.cloned()
			.collect();
		for old in moved {
			let new = format!("{dst}{}", &old[src.len()..]);
			if let Some(ino) = self.inos.remove(&old) {
				self.inos.insert(new.clone(), ino);
				self.paths.insert(ino, new);
			}
		}
	}

	pub fn join(parent: &str, name: &str) -> String {
		if parent.is_empty() {
			name.to_string()
		} else {
			format!("{parent}/{name}")
		}
	}

	fn make_attr(&self, ino: u64, kind: FileType, size: u64, time: SystemTime) -> FileAttr {
		FileAttr {
			ino,
			size,
			blocks: size.div_ceil(STAT_BLKSIZE),
			atime: time,
			mtime: time,
			ctime: time,
			crtime: time,
			kind,
			perm: match kind {
				FileType::Directory => 0o755,
				_ => 0o644,
			},
			nlink: match kind {
				FileType::Directory => 2,
				_ => 1,
			},
			uid: self.uid,
			gid: self.gid,
			rdev: 0,
			blksize: self.sfs.info().bsize as u32,
			flags: 0,
		}
	}

	/// Attributes per the bridge contract: owner is the mounting user,
	/// 0755 directories, 0644 files, timestamps from the entry records.
	pub fn attr_of(&mut self, path: &str) -> IoResult<FileAttr> {
		if path.is_empty() {
			let t = self.sfs.sfs_time();
			return Ok(self.make_attr(fuser::FUSE_ROOT_ID, FileType::Directory, 0, t));
		}
		if self.sfs.is_dir(path) {
			let t = self.sfs.dir_time(path)?;
			let ino = self.ino_of(path);
			Ok(self.make_attr(ino, FileType::Directory, 0, t))
		} else if self.sfs.is_file(path) {
			let t = self.sfs.file_time(path)?;
			let size = self.sfs.get_file_size(path);
			let ino = self.ino_of(path);
			Ok(self.make_attr(ino, FileType::RegularFile, size, t))
		} else {
			Err(IoError::from_raw_os_error(libc::ENOENT))
		}
	}
}
