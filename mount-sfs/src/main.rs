use std::process::exit;

use anyhow::Result;
use clap::Parser;

use crate::{cli::Cli, fs::Fs};

mod cli;
mod fs;
mod fuse3;

fn main() -> Result<()> {
	let cli = match Cli::try_parse() {
		Ok(cli) => cli,
		Err(e) => {
			let _ = e.print();
			match e.kind() {
				clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
					exit(0)
				}
				_ => exit(1),
			}
		}
	};

	env_logger::builder()
		.filter_level(cli.verbose.log_level_filter())
		.init();

	let fs = match Fs::open(&cli.image, !cli.read_only()) {
		Ok(fs) => fs,
		Err(e) => {
			eprintln!("mount-sfs: {}: {e}", cli.image.display());
			exit(2);
		}
	};

	if cli.foreground {
		fuser::mount2(fs, &cli.mountpoint, &cli.options())?;
	} else {
		let session = fuser::spawn_mount2(fs, &cli.mountpoint, &cli.options())?;
		session.join();
	}

	Ok(())
}
