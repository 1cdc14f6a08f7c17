use std::io::{Cursor, Error as IoError, ErrorKind, Result as IoResult};

use bincode::{Decode, Encode};

use crate::{
	data::*,
	decoder::{Config, Decoder},
};

/// The byte that makes the sum of `buf` plus itself wrap to zero mod 256.
pub fn checksum(buf: &[u8]) -> u8 {
	0u8.wrapping_sub(buf.iter().fold(0u8, |s, b| s.wrapping_add(*b)))
}

pub fn checksum_ok(buf: &[u8]) -> bool {
	buf.iter().fold(0u8, |s, b| s.wrapping_add(*b)) == 0
}

/// Continuation slots needed for a name of `name_len` bytes when the
/// first slot holds `first_len` of them. The terminating NUL does not
/// need to fit; decoding stops at the slot boundary.
pub fn num_cont_for_name(first_len: usize, name_len: usize) -> u8 {
	if name_len <= first_len {
		0
	} else {
		(name_len - first_len).div_ceil(ENTRY_SIZE) as u8
	}
}

/* fixed-offset field groups in front of the variable-length names */

#[derive(Decode, Encode)]
struct VolumeHead {
	tag:        u8,
	crc:        u8,
	resvd:      u16,
	time_stamp: SfsTime,
}

#[derive(Decode, Encode)]
struct DirHead {
	tag:        u8,
	crc:        u8,
	num_cont:   u8,
	time_stamp: SfsTime,
}

#[derive(Decode, Encode)]
struct FileHead {
	tag:         u8,
	crc:         u8,
	num_cont:    u8,
	time_stamp:  SfsTime,
	start_block: u64,
	end_block:   u64,
	file_len:    u64,
}

#[derive(Decode, Encode)]
struct UnusableHead {
	tag:         u8,
	crc:         u8,
	resvd:       [u8; 8],
	start_block: u64,
	end_block:   u64,
}

const VOL_NAME_OFF: usize = 12;
const DIR_NAME_OFF: usize = 11;
const FILE_NAME_OFF: usize = 35;

fn read_name(buf: &[u8]) -> IoResult<String> {
	let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
	match std::str::from_utf8(&buf[..end]) {
		Ok(s) => Ok(s.to_string()),
		Err(_) => Err(IoError::new(
			ErrorKind::InvalidData,
			"entry name is not valid UTF-8",
		)),
	}
}

impl Entry {
	pub fn tag(&self) -> u8 {
		match &self.kind {
			EntryKind::Volume(_) => ENTRY_VOL_ID,
			EntryKind::Start => ENTRY_START,
			EntryKind::Unused => ENTRY_UNUSED,
			EntryKind::Dir(_) => ENTRY_DIR,
			EntryKind::File(_) => ENTRY_FILE,
			EntryKind::Unusable(_) => ENTRY_UNUSABLE,
			EntryKind::DirDel(_) => ENTRY_DIR_DEL,
			EntryKind::FileDel(_) => ENTRY_FILE_DEL,
		}
	}

	pub fn num_cont(&self) -> u8 {
		match &self.kind {
			EntryKind::Dir(d) | EntryKind::DirDel(d) => d.num_cont,
			EntryKind::File(f) | EntryKind::FileDel(f) => f.num_cont,
			_ => 0,
		}
	}

	/// On-disk size of the entry, continuations included.
	pub fn bytes(&self) -> usize {
		(1 + self.num_cont() as usize) * ENTRY_SIZE
	}

	/// Slots `insert_entry` may reclaim from this entry. A non-reusable
	/// entry resets the run.
	pub fn usable_slots(&self) -> usize {
		match &self.kind {
			EntryKind::Unused => 1,
			EntryKind::DirDel(_) | EntryKind::FileDel(_) => 1 + self.num_cont() as usize,
			_ => 0,
		}
	}

	pub fn name(&self) -> Option<&str> {
		match &self.kind {
			EntryKind::Dir(d) | EntryKind::DirDel(d) => Some(&d.name),
			EntryKind::File(f) | EntryKind::FileDel(f) => Some(&f.name),
			EntryKind::Volume(v) => Some(&v.name),
			_ => None,
		}
	}

	/// Decode an entry from its raw slots. `buf` must hold all
	/// `(1 + num_cont) * 64` bytes.
	pub fn decode(buf: &[u8], offset: u64) -> IoResult<Entry> {
		debug_assert!(!buf.is_empty() && buf.len() % ENTRY_SIZE == 0);
		if !checksum_ok(buf) {
			return Err(IoError::new(
				ErrorKind::InvalidData,
				format!("entry at {offset:#x}: bad checksum"),
			));
		}

		let mut d = Decoder::new(Cursor::new(buf), Config::little());
		let kind = match buf[0] {
			ENTRY_VOL_ID => {
				let h: VolumeHead = d.decode()?;
				EntryKind::Volume(VolumeData {
					time_stamp: h.time_stamp,
					name:       read_name(&buf[VOL_NAME_OFF..ENTRY_SIZE])?,
				})
			}
			ENTRY_START => EntryKind::Start,
			ENTRY_UNUSED => EntryKind::Unused,
			ENTRY_DIR | ENTRY_DIR_DEL => {
				let h: DirHead = d.decode()?;
				let data = DirData {
					num_cont:   h.num_cont,
					time_stamp: h.time_stamp,
					name:       read_name(&buf[DIR_NAME_OFF..])?,
				};
				if buf[0] == ENTRY_DIR {
					EntryKind::Dir(data)
				} else {
					EntryKind::DirDel(data)
				}
			}
			ENTRY_FILE | ENTRY_FILE_DEL => {
				let h: FileHead = d.decode()?;
				let data = FileData {
					num_cont:    h.num_cont,
					time_stamp:  h.time_stamp,
					start_block: h.start_block,
					end_block:   h.end_block,
					file_len:    h.file_len,
					name:        read_name(&buf[FILE_NAME_OFF..])?,
				};
				if buf[0] == ENTRY_FILE {
					EntryKind::File(data)
				} else {
					EntryKind::FileDel(data)
				}
			}
			ENTRY_UNUSABLE => {
				let h: UnusableHead = d.decode()?;
				EntryKind::Unusable(UnusableData {
					start_block: h.start_block,
					end_block:   h.end_block,
				})
			}
			other => {
				return Err(IoError::new(
					ErrorKind::InvalidData,
					format!("unknown entry type {other:#04x} at {offset:#x}"),
				))
			}
		};
		Ok(Entry {
			offset,
			kind,
		})
	}

	/// Encode the entry into its raw slots, zero-padded, with the
	/// checksum byte set so the slots sum to zero.
	pub fn encode(&self) -> Vec<u8> {
		let cfg = Config::little();
		let size = self.bytes();
		let (mut buf, name_off, name) = match &self.kind {
			EntryKind::Volume(v) => {
				let h = VolumeHead {
					tag:        ENTRY_VOL_ID,
					crc:        0,
					resvd:      0,
					time_stamp: v.time_stamp,
				};
				(cfg.encode_to_vec(&h).unwrap(), VOL_NAME_OFF, Some(&v.name))
			}
			EntryKind::Start => (vec![ENTRY_START], 0, None),
			EntryKind::Unused => (vec![ENTRY_UNUSED], 0, None),
			EntryKind::Dir(d) | EntryKind::DirDel(d) => {
				let h = DirHead {
					tag:        self.tag(),
					crc:        0,
					num_cont:   d.num_cont,
					time_stamp: d.time_stamp,
				};
				(cfg.encode_to_vec(&h).unwrap(), DIR_NAME_OFF, Some(&d.name))
			}
			EntryKind::File(f) | EntryKind::FileDel(f) => {
				let h = FileHead {
					tag:         self.tag(),
					crc:         0,
					num_cont:    f.num_cont,
					time_stamp:  f.time_stamp,
					start_block: f.start_block,
					end_block:   f.end_block,
					file_len:    f.file_len,
				};
				(cfg.encode_to_vec(&h).unwrap(), FILE_NAME_OFF, Some(&f.name))
			}
			EntryKind::Unusable(u) => {
				let h = UnusableHead {
					tag:         ENTRY_UNUSABLE,
					crc:         0,
					resvd:       [0u8; 8],
					start_block: u.start_block,
					end_block:   u.end_block,
				};
				(cfg.encode_to_vec(&h).unwrap(), 0, None)
			}
		};
		buf.resize(size, 0u8);
		if let Some(name) = name {
			let n = name.len().min(size - name_off);
			buf[name_off..name_off + n].copy_from_slice(&name.as_bytes()[..n]);
		}
		buf[1] = checksum(&buf);
		buf
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn roundtrip(kind: EntryKind) {
		let e = Entry {
			offset: 0x1000,
			kind,
		};
		let buf = e.encode();
		assert_eq!(buf.len(), e.bytes());
		assert!(checksum_ok(&buf));
		assert_eq!(Entry::decode(&buf, 0x1000).unwrap(), e);
	}

	#[test]
	fn roundtrip_volume() {
		roundtrip(EntryKind::Volume(VolumeData {
			time_stamp: 0x1234_5678_9abc,
			name:       "scratch".into(),
		}));
	}

	#[test]
	fn roundtrip_markers() {
		roundtrip(EntryKind::Start);
		roundtrip(EntryKind::Unused);
	}

	#[test]
	fn roundtrip_dir() {
		roundtrip(EntryKind::Dir(DirData {
			num_cont:   0,
			time_stamp: 99 << 16,
			name:       "music".into(),
		}));
		roundtrip(EntryKind::DirDel(DirData {
			num_cont:   1,
			time_stamp: 99 << 16,
			name:       "m".repeat(DIR_NAME_LEN + 10),
		}));
	}

	#[test]
	fn roundtrip_file() {
		roundtrip(EntryKind::File(FileData {
			num_cont:    0,
			time_stamp:  7 << 16,
			start_block: 4,
			end_block:   7,
			file_len:    2000,
			name:        "a.txt".into(),
		}));
		roundtrip(EntryKind::FileDel(FileData {
			num_cont:    2,
			time_stamp:  7 << 16,
			start_block: 4,
			end_block:   7,
			file_len:    2000,
			name:        "f".repeat(FILE_NAME_LEN + ENTRY_SIZE + 1),
		}));
	}

	#[test]
	fn roundtrip_unusable() {
		roundtrip(EntryKind::Unusable(UnusableData {
			start_block: 100,
			end_block:   110,
		}));
	}

	#[test]
	fn corrupt_checksum_is_rejected() {
		let e = Entry {
			offset: 0,
			kind:   EntryKind::Start,
		};
		let mut buf = e.encode();
		buf[40] ^= 1;
		assert!(Entry::decode(&buf, 0).is_err());
	}

	#[rstest]
	#[case(FILE_NAME_LEN, 29, 0)] // exactly fills the first slot
	#[case(FILE_NAME_LEN, 30, 1)]
	#[case(FILE_NAME_LEN, 93, 1)] // 29 + 64
	#[case(FILE_NAME_LEN, 94, 2)]
	#[case(DIR_NAME_LEN, 53, 0)]
	#[case(DIR_NAME_LEN, 54, 1)]
	#[case(DIR_NAME_LEN, 117, 1)]
	#[case(DIR_NAME_LEN, 118, 2)]
	fn continuation_counts(#[case] first: usize, #[case] len: usize, #[case] expected: u8) {
		assert_eq!(num_cont_for_name(first, len), expected);
	}

	#[test]
	fn name_filling_every_slot_byte_survives() {
		// length 93 = 29 + 64 leaves no room for the NUL; the decoder
		// stops at the slot boundary instead
		let name = "x".repeat(93);
		roundtrip(EntryKind::File(FileData {
			num_cont:    num_cont_for_name(FILE_NAME_LEN, 93),
			time_stamp:  0,
			start_block: 1,
			end_block:   0,
			file_len:    0,
			name,
		}));
	}
}
