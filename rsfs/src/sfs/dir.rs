use std::io::Result as IoResult;

use super::Sfs;
use crate::{blockreader::Backend, data::*, entry::num_cont_for_name, err, time};

impl<R: Backend> Sfs<R> {
	pub fn mkdir(&mut self, path: &str) -> IoResult<()> {
		log::trace!("mkdir({path:?});");
		self.assert_rw()?;
		self.check_new_name(path)?;
		if path.len() > DIR_NAME_LEN + 255 * ENTRY_SIZE {
			return Err(err!(ENAMETOOLONG));
		}
		let d = DirData {
			num_cont:   num_cont_for_name(DIR_NAME_LEN, path.len()),
			time_stamp: time::now(),
			name:       path.to_string(),
		};
		self.put_new_entry(EntryKind::Dir(d))
	}

	/// Does any live entry sit below directory `path`? Tombstoned
	/// children don't count; they are unreachable for good.
	fn is_dir_empty(&self, path: &str) -> bool {
		!self.entries.iter().any(|e| {
			let name = match &e.kind {
				EntryKind::Dir(d) => &d.name,
				EntryKind::File(f) => &f.name,
				_ => return false,
			};
			name.len() > path.len()
				&& name.starts_with(path)
				&& name.as_bytes()[path.len()] == b'/'
		})
	}

	/// Remove an empty directory: the entry becomes a Directory-deleted
	/// tombstone whose slots are reusable.
	pub fn rmdir(&mut self, path: &str) -> IoResult<()> {
		log::trace!("rmdir({path:?});");
		self.assert_rw()?;
		let Some(i) = self.find_dir(path) else {
			return if self.find_file(path).is_some() {
				Err(err!(ENOTDIR))
			} else {
				Err(err!(ENOENT))
			};
		};
		if !self.is_dir_empty(path) {
			return Err(err!(ENOTEMPTY));
		}
		let EntryKind::Dir(d) = self.entries[i].kind.clone() else {
			unreachable!()
		};
		self.entries[i].kind = EntryKind::DirDel(d);
		self.rewrite(i)
	}

	/// Rename or move a file or directory. A directory carries its whole
	/// subtree. With `replace` an existing destination of the same type
	/// is removed first (directories only when empty).
	pub fn rename(&mut self, src: &str, dst: &str, replace: bool) -> IoResult<()> {
		log::trace!("rename({src:?}, {dst:?}, {replace});");
		self.assert_rw()?;
		if src == dst {
			return Ok(());
		}
		let src_is_dir = match self.find_any(src) {
			Some(i) => matches!(self.entries[i].kind, EntryKind::Dir(_)),
			None => return Err(err!(ENOENT)),
		};
		self.check_new_path(dst)?;

		if let Some(di) = self.find_any(dst) {
			if !replace {
				return Err(err!(EEXIST));
			}
			let dst_is_dir = matches!(self.entries[di].kind, EntryKind::Dir(_));
			if src_is_dir != dst_is_dir {
				return Err(if dst_is_dir {
					err!(EISDIR)
				} else {
					err!(ENOTDIR)
				});
			}
			if dst_is_dir && !self.is_dir_empty(dst) {
				return Err(err!(ENOTEMPTY));
			}
			// a replaced file gives its blocks back right away
			if let EntryKind::File(f) = &self.entries[di].kind {
				if f.file_len > 0 {
					let (start, blocks) = (f.start_block, f.end_block + 1 - f.start_block);
					self.free.add(start, blocks);
				}
			}
			self.delete_entry(di)?;
		}

		if src_is_dir {
			self.move_dir(src, dst)
		} else {
			let i = self.find_file(src).ok_or(err!(ENOENT))?;
			self.rename_entry(i, dst)
		}
	}

	/// Rewrite the name prefix of `src` and every live entry below it.
	fn move_dir(&mut self, src: &str, dst: &str) -> IoResult<()> {
		let names: Vec<String> = self
			.entries
			.iter()
			.filter_map(|e| match &e.kind {
				EntryKind::Dir(d) => Some(&d.name),
				EntryKind::File(f) => Some(&f.name),
				_ => None,
			})
			.filter(|n| {
				n.as_str() == src
					|| (n.len() > src.len()
						&& n.starts_with(src)
						&& n.as_bytes()[src.len()] == b'/')
			})
			.cloned()
			.collect();

		for name in names {
			let new_name = format!("{dst}{}", &name[src.len()..]);
			let i = self
				.find_any(&name)
				.unwrap_or_else(|| panic!("entry {name:?} vanished during rename"));
			self.rename_entry(i, &new_name)?;
		}
		Ok(())
	}

	/// Replace `entries[i]` with an identical entry under a new name.
	/// The slot count follows the name, so the entry is deleted and
	/// re-inserted rather than rewritten.
	fn rename_entry(&mut self, i: usize, new_name: &str) -> IoResult<()> {
		let first_len = match &self.entries[i].kind {
			EntryKind::Dir(_) => DIR_NAME_LEN,
			EntryKind::File(_) => FILE_NAME_LEN,
			_ => return Err(err!(EINVAL)),
		};
		if new_name.len() > first_len + 255 * ENTRY_SIZE {
			return Err(err!(ENAMETOOLONG));
		}
		let num_cont = num_cont_for_name(first_len, new_name.len());
		let kind = match &self.entries[i].kind {
			EntryKind::Dir(d) => EntryKind::Dir(DirData {
				num_cont,
				time_stamp: d.time_stamp,
				name: new_name.to_string(),
			}),
			EntryKind::File(f) => EntryKind::File(FileData {
				num_cont,
				time_stamp: f.time_stamp,
				start_block: f.start_block,
				end_block: f.end_block,
				file_len: f.file_len,
				name: new_name.to_string(),
			}),
			_ => unreachable!(),
		};

		// a name needing no more slots than the old one is guaranteed to
		// fit back into the freed run; a longer one is stored first so a
		// full index cannot lose the entry
		if 1 + num_cont as usize <= 1 + self.entries[i].num_cont() as usize {
			self.delete_entry(i)?;
			self.put_new_entry(kind)
		} else {
			let old_name = self.entries[i]
				.name()
				.expect("renaming a nameless entry")
				.to_string();
			self.put_new_entry(kind)?;
			let i = self
				.find_any(&old_name)
				.unwrap_or_else(|| panic!("entry {old_name:?} vanished during rename"));
			self.delete_entry(i)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::super::tests::scratch;
	use crate::data::EntryKind;

	#[test]
	fn mkdir_and_children() {
		let mut sfs = scratch(64);
		sfs.mkdir("d").unwrap();
		assert!(sfs.is_dir("d"));
		sfs.create("d/x").unwrap();
		sfs.mkdir("d/sub").unwrap();
		sfs.create("d/sub/y").unwrap();
		sfs.check().unwrap();

		let mut names = Vec::new();
		let mut cur = sfs.first("d");
		while let Some(n) = cur {
			names.push(n);
			cur = sfs.next("d");
		}
		names.sort();
		assert_eq!(names, ["sub", "x"]);

		let mut root = Vec::new();
		let mut cur = sfs.first("");
		while let Some(n) = cur {
			root.push(n);
			cur = sfs.next("");
		}
		assert_eq!(root, ["d"]);
	}

	/// rmdir refuses a directory with live children, and the deleted
	/// children of a tombstoned directory stay invisible.
	#[test]
	fn rmdir_refuses_non_empty() {
		let mut sfs = scratch(64);
		sfs.mkdir("p").unwrap();
		sfs.create("p/f").unwrap();
		assert_eq!(
			sfs.rmdir("p").unwrap_err().raw_os_error(),
			Some(libc::ENOTEMPTY)
		);

		sfs.delete("p/f").unwrap();
		sfs.rmdir("p").unwrap();
		sfs.check().unwrap();
		assert!(!sfs.is_dir("p"));
		assert!(
			sfs.entries
				.iter()
				.any(|e| matches!(e.kind, EntryKind::DirDel(_)))
		);
	}

	#[test]
	fn rmdir_type_errors() {
		let mut sfs = scratch(64);
		sfs.create("f").unwrap();
		assert_eq!(
			sfs.rmdir("f").unwrap_err().raw_os_error(),
			Some(libc::ENOTDIR)
		);
		assert_eq!(
			sfs.rmdir("g").unwrap_err().raw_os_error(),
			Some(libc::ENOENT)
		);
	}

	#[test]
	fn rename_same_path_is_a_noop() {
		let mut sfs = scratch(64);
		sfs.create("a").unwrap();
		sfs.rename("a", "a", false).unwrap();
		assert!(sfs.is_file("a"));
	}

	#[test]
	fn rename_file_keeps_contents() {
		let mut sfs = scratch(64);
		sfs.create("a").unwrap();
		sfs.resize("a", 700).unwrap();
		sfs.write("a", b"payload", 0).unwrap();

		sfs.rename("a", "b", false).unwrap();
		sfs.check().unwrap();
		assert!(!sfs.is_file("a"));
		let mut buf = [0u8; 7];
		sfs.read("b", &mut buf, 0).unwrap();
		assert_eq!(&buf, b"payload");
	}

	/// Renaming a directory carries the whole subtree; no data moves.
	#[test]
	fn rename_dir_carries_children() {
		let mut sfs = scratch(64);
		sfs.mkdir("d").unwrap();
		sfs.create("d/x").unwrap();
		sfs.mkdir("d/y").unwrap();
		sfs.create("d/y/z").unwrap();
		sfs.resize("d/x", 600).unwrap();
		let i = sfs.find_file("d/x").unwrap();
		let EntryKind::File(f) = &sfs.entries[i].kind else {
			panic!()
		};
		let blocks = (f.start_block, f.end_block);

		sfs.rename("d", "d2", false).unwrap();
		sfs.check().unwrap();
		for name in ["d2", "d2/y"] {
			assert!(sfs.is_dir(name), "{name} missing");
		}
		for name in ["d2/x", "d2/y/z"] {
			assert!(sfs.is_file(name), "{name} missing");
		}
		assert!(!sfs.is_dir("d"));
		assert!(!sfs.is_file("d/x"));

		let i = sfs.find_file("d2/x").unwrap();
		let EntryKind::File(f) = &sfs.entries[i].kind else {
			panic!()
		};
		assert_eq!((f.start_block, f.end_block), blocks);
	}

	#[test]
	fn rename_respects_replace_flag() {
		let mut sfs = scratch(64);
		sfs.create("a").unwrap();
		sfs.create("b").unwrap();
		sfs.resize("b", 100).unwrap();

		assert_eq!(
			sfs.rename("a", "b", false).unwrap_err().raw_os_error(),
			Some(libc::EEXIST)
		);
		sfs.rename("a", "b", true).unwrap();
		sfs.check().unwrap();
		assert!(!sfs.is_file("a"));
		assert_eq!(sfs.get_file_size("b"), 0);
	}

	#[test]
	fn rename_type_mismatch() {
		let mut sfs = scratch(64);
		sfs.create("f").unwrap();
		sfs.mkdir("d").unwrap();
		assert!(sfs.rename("f", "d", true).is_err());
		assert!(sfs.rename("d", "f", true).is_err());
	}

	#[test]
	fn rename_into_missing_parent_fails() {
		let mut sfs = scratch(64);
		sfs.create("a").unwrap();
		assert_eq!(
			sfs.rename("a", "nope/a", false).unwrap_err().raw_os_error(),
			Some(libc::ENOENT)
		);
	}

	#[test]
	fn rename_replaces_empty_dir_only() {
		let mut sfs = scratch(64);
		sfs.mkdir("d").unwrap();
		sfs.mkdir("e").unwrap();
		sfs.create("e/f").unwrap();
		assert_eq!(
			sfs.rename("d", "e", true).unwrap_err().raw_os_error(),
			Some(libc::ENOTEMPTY)
		);
		sfs.delete("e/f").unwrap();
		sfs.rename("d", "e", true).unwrap();
		sfs.check().unwrap();
		assert!(sfs.is_dir("e"));
		assert!(!sfs.is_dir("d"));
	}

	/// A rename to a longer name grows the entry across slots.
	#[test]
	fn rename_to_long_name() {
		let mut sfs = scratch(64);
		sfs.create("short").unwrap();
		sfs.resize("short", 300).unwrap();
		let long = "n".repeat(40); // needs a continuation slot
		sfs.rename("short", &long, false).unwrap();
		sfs.check().unwrap();
		assert!(sfs.is_file(&long));
		assert_eq!(sfs.get_file_size(&long), 300);
	}
}
