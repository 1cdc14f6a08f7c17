use std::process::Command;

use assert_cmd::cargo::CommandCargoExt;

#[test]
fn missing_arguments_exit_1() {
	let out = Command::cargo_bin("mount-sfs")
		.unwrap()
		.output()
		.unwrap();
	assert_eq!(out.status.code(), Some(1));
}

#[test]
fn help_exits_0() {
	let out = Command::cargo_bin("mount-sfs")
		.unwrap()
		.arg("--help")
		.output()
		.unwrap();
	assert_eq!(out.status.code(), Some(0));
}

#[test]
fn unreadable_image_exits_2() {
	let d = tempfile::tempdir().unwrap();
	let out = Command::cargo_bin("mount-sfs")
		.unwrap()
		.arg("--name")
		.arg(d.path().join("does-not-exist.img"))
		.arg(d.path())
		.output()
		.unwrap();
	assert_eq!(out.status.code(), Some(2));
}

#[test]
fn garbage_image_exits_2() {
	let d = tempfile::tempdir().unwrap();
	let img = d.path().join("garbage.img");
	std::fs::write(&img, vec![0u8; 1 << 20]).unwrap();
	let out = Command::cargo_bin("mount-sfs")
		.unwrap()
		.arg("--name")
		.arg(&img)
		.arg(d.path())
		.output()
		.unwrap();
	assert_eq!(out.status.code(), Some(2));
}

#[test]
fn mkfs_creates_a_mountable_image() {
	let d = tempfile::tempdir().unwrap();
	let img = d.path().join("fresh.img");
	let out = Command::cargo_bin("mkfs-sfs")
		.unwrap()
		.arg(&img)
		.arg("--blocks")
		.arg("256")
		.arg("--label")
		.arg("fresh")
		.output()
		.unwrap();
	assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

	// the freshly formatted image passes the core's consistency check
	let sfs = rsfs::Sfs::open(&img, true).unwrap();
	assert_eq!(sfs.label(), "fresh");
	sfs.check().unwrap();
}

#[test]
fn mkfs_rejects_bad_geometry() {
	let d = tempfile::tempdir().unwrap();
	let img = d.path().join("bad.img");
	let out = Command::cargo_bin("mkfs-sfs")
		.unwrap()
		.arg(&img)
		.arg("--blocks")
		.arg("2")
		.output()
		.unwrap();
	assert!(!out.status.success());
}
