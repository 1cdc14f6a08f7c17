use std::{
	ffi::{c_int, OsStr},
	io::{Error as IoError, ErrorKind, Result as IoResult},
	time::{Duration, SystemTime},
};

use fuser::{FileType, Filesystem, KernelConfig, Request, TimeOrNow};

use crate::fs::Fs;

const TTL: Duration = Duration::ZERO;

fn run<T>(f: impl FnOnce() -> IoResult<T>) -> Result<T, c_int> {
	f().map_err(|e| {
		if e.kind() != ErrorKind::NotFound {
			log::error!("Error: {e}");
		}
		e.raw_os_error().unwrap_or(libc::EIO)
	})
}

fn transname(name: &OsStr) -> IoResult<&str> {
	name.to_str()
		.ok_or_else(|| IoError::from_raw_os_error(libc::EINVAL))
}

impl Fs {
	fn child_path(&self, parent: u64, name: &OsStr) -> IoResult<String> {
		let dir = self.path_of(parent)?;
		Ok(Fs::join(&dir, transname(name)?))
	}
}

impl Filesystem for Fs {
	fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
		Ok(())
	}

	fn destroy(&mut self) {}

	fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEntry) {
		let f = || {
			let path = self.child_path(parent, name)?;
			self.attr_of(&path)
		};
		match run(f) {
			Ok(attr) => reply.entry(&TTL, &attr, 0),
			Err(e) => reply.error(e),
		}
	}

	fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyAttr) {
		let f = || {
			let path = self.path_of(ino)?;
			self.attr_of(&path)
		};
		match run(f) {
			Ok(attr) => reply.attr(&TTL, &attr),
			Err(e) => reply.error(e),
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn setattr(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_mode: Option<u32>,
		_uid: Option<u32>,
		_gid: Option<u32>,
		size: Option<u64>,
		_atime: Option<TimeOrNow>,
		mtime: Option<TimeOrNow>,
		_ctime: Option<SystemTime>,
		_fh: Option<u64>,
		_crtime: Option<SystemTime>,
		_chgtime: Option<SystemTime>,
		_bkuptime: Option<SystemTime>,
		_flags: Option<u32>,
		reply: fuser::ReplyAttr,
	) {
		let f = || {
			let path = self.path_of(ino)?;
			if let Some(size) = size {
				self.sfs.resize(&path, size)?;
			}
			if let Some(mtime) = mtime {
				let t = match mtime {
					TimeOrNow::SpecificTime(t) => t,
					TimeOrNow::Now => SystemTime::now(),
				};
				self.sfs.set_time(&path, t)?;
			}
			self.attr_of(&path)
		};
		match run(f) {
			Ok(attr) => reply.attr(&TTL, &attr),
			Err(e) => reply.error(e),
		}
	}

	fn mkdir(
		&mut self,
		_req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		_mode: u32,
		_umask: u32,
		reply: fuser::ReplyEntry,
	) {
		let f = || {
			let path = self.child_path(parent, name)?;
			self.sfs.mkdir(&path)?;
			self.attr_of(&path)
		};
		match run(f) {
			Ok(attr) => reply.entry(&TTL, &attr, 0),
			Err(e) => reply.error(e),
		}
	}

	fn create(
		&mut self,
		_req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		_mode: u32,
		_umask: u32,
		_flags: i32,
		reply: fuser::ReplyCreate,
	) {
		let f = || {
			let path = self.child_path(parent, name)?;
			self.sfs.create(&path)?;
			self.attr_of(&path)
		};
		match run(f) {
			Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
			Err(e) => reply.error(e),
		}
	}

	fn mknod(
		&mut self,
		_req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		mode: u32,
		_umask: u32,
		_rdev: u32,
		reply: fuser::ReplyEntry,
	) {
		let f = || {
			if (mode & libc::S_IFMT as u32) != libc::S_IFREG as u32 {
				return Err(IoError::from_raw_os_error(libc::EOPNOTSUPP));
			}
			let path = self.child_path(parent, name)?;
			self.sfs.create(&path)?;
			self.attr_of(&path)
		};
		match run(f) {
			Ok(attr) => reply.entry(&TTL, &attr, 0),
			Err(e) => reply.error(e),
		}
	}

	fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEmpty) {
		let f = || {
			let path = self.child_path(parent, name)?;
			self.sfs.delete(&path)?;
			self.forget_path(&path);
			Ok(())
		};
		match run(f) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}

	fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEmpty) {
		let f = || {
			let path = self.child_path(parent, name)?;
			self.sfs.rmdir(&path)?;
			self.forget_path(&path);
			Ok(())
		};
		match run(f) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}

	fn rename(
		&mut self,
		_req: &Request<'_>,
		parent: u64,
		name: &OsStr,
		newparent: u64,
		newname: &OsStr,
		flags: u32,
		reply: fuser::ReplyEmpty,
	) {
		let f = || {
			let src = self.child_path(parent, name)?;
			let dst = self.child_path(newparent, newname)?;
			let replace = (flags & libc::RENAME_NOREPLACE) == 0;
			self.sfs.rename(&src, &dst, replace)?;
			self.forget_path(&dst);
			self.move_path(&src, &dst);
			Ok(())
		};
		match run(f) {
			Ok(()) => reply.ok(),
			Err(e) => reply.error(e),
		}
	}

	fn open(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
		reply.opened(0, 0);
	}

	fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
		reply.opened(0, 0);
	}

	fn read(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		size: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: fuser::ReplyData,
	) {
		let f = || {
			let path = self.path_of(ino)?;
			let mut buf = vec![0u8; size as usize];
			let n = self.sfs.read(&path, &mut buf, offset as u64)?;
			buf.truncate(n);
			Ok(buf)
		};
		match run(f) {
			Ok(buf) => reply.data(&buf),
			Err(e) => reply.error(e),
		}
	}

	fn write(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		data: &[u8],
		_write_flags: u32,
		_flags: i32,
		_lock_owner: Option<u64>,
		reply: fuser::ReplyWrite,
	) {
		let f = || {
			let path = self.path_of(ino)?;
			let offset = offset as u64;
			// the core never grows a file on write
			let end = offset + data.len() as u64;
			if end > self.sfs.get_file_size(&path) {
				self.sfs.resize(&path, end)?;
			}
			let n = self.sfs.write(&path, data, offset)?;
			Ok(n as u32)
		};
		match run(f) {
			Ok(n) => reply.written(n),
			Err(e) => reply.error(e),
		}
	}

	fn flush(
		&mut self,
		_req: &Request<'_>,
		_ino: u64,
		_fh: u64,
		_lock_owner: u64,
		reply: fuser::ReplyEmpty,
	) {
		// every write already went to the image
		reply.ok();
	}

	fn fsync(
		&mut self,
		_req: &Request<'_>,
		_ino: u64,
		_fh: u64,
		_datasync: bool,
		reply: fuser::ReplyEmpty,
	) {
		reply.ok();
	}

	fn readdir(
		&mut self,
		_req: &Request<'_>,
		ino: u64,
		_fh: u64,
		offset: i64,
		mut reply: fuser::ReplyDirectory,
	) {
		let f = || {
			let path = self.path_of(ino)?;
			if !path.is_empty() && !self.sfs.is_dir(&path) {
				return Err(IoError::from_raw_os_error(libc::ENOTDIR));
			}

			let parent_ino = match path.rfind('/') {
				Some(i) => self.ino_of(&path[..i]),
				// the root and top-level entries both answer to the root
				None => fuser::FUSE_ROOT_ID,
			};
			let mut entries = vec![
				(ino, FileType::Directory, ".".to_string()),
				(parent_ino, FileType::Directory, "..".to_string()),
			];
			let mut cur = self.sfs.first(&path);
			while let Some(name) = cur {
				let child = Fs::join(&path, &name);
				let kind = if self.sfs.is_dir(&child) {
					FileType::Directory
				} else {
					FileType::RegularFile
				};
				let child_ino = self.ino_of(&child);
				entries.push((child_ino, kind, name));
				cur = self.sfs.next(&path);
			}
			Ok(entries)
		};
		match run(f) {
			Ok(entries) => {
				for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
					if reply.add(*ino, (i + 1) as i64, *kind, name) {
						break;
					}
				}
				reply.ok()
			}
			Err(e) => reply.error(e),
		}
	}

	fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
		let info = self.sfs.info();
		reply.statfs(
			info.blocks,
			info.bfree,
			info.bfree,
			info.files,
			info.ffree,
			info.bsize as u32,
			255,
			info.bsize as u32,
		);
	}
}
