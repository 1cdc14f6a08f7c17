use std::{fs::OpenOptions, path::PathBuf, process::exit};

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use rsfs::{FormatOpts, Sfs};

/// Create a Simple File System image.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
	/// Path of the image file to create
	image: PathBuf,

	/// Total size of the image in blocks
	#[arg(short, long, default_value_t = 2880)]
	blocks: u64,

	/// Block size exponent; block bytes = 1 << (EXP + 7)
	#[arg(short = 'e', long, default_value_t = 2)]
	block_size: u8,

	/// Reserved blocks at the start of the image
	#[arg(short, long, default_value_t = 1)]
	rsvd: u32,

	/// Volume label
	#[arg(short, long, default_value = "")]
	label: String,

	#[command(flatten)]
	verbose: Verbosity<WarnLevel>,
}

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

	let opts = FormatOpts {
		total_blocks: cli.blocks,
		block_size:   cli.block_size,
		rsvd_blocks:  cli.rsvd,
		label:        cli.label.clone(),
	};
	let bs = 1u64 << (cli.block_size + 7);

	let file = OpenOptions::new()
		.read(true)
		.write(true)
		.create(true)
		.truncate(true)
		.open(&cli.image)
		.with_context(|| format!("cannot create {}", cli.image.display()))?;
	file.set_len(cli.blocks * bs)
		.with_context(|| format!("cannot size {}", cli.image.display()))?;

	Sfs::format(file, &opts).context("formatting failed")?;
	println!(
		"{}: {} blocks of {} bytes",
		cli.image.display(),
		cli.blocks,
		bs
	);
	Ok(())
}
