mod blockreader;
mod data;
mod decoder;
mod entry;
mod sfs;
mod time;

pub use crate::{
	blockreader::{Backend, BlockReader},
	data::Info,
	sfs::{FormatOpts, Sfs},
};
