use std::{fs::File, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use ixfs::{storage::FileBackedStorage, Ixfs};

#[derive(Parser)]
struct Args {
    /// ixfs disk file
    disk_file: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let disk_file = File::options()
        .read(true)
        .open(&args.disk_file)
        .context("unable to open disk file")?;
    let storage = FileBackedStorage::open_formatted(disk_file)?;

    // mounting rebuilds the tree and runs the full check
    let ixfs = Ixfs::mount(storage).context("filesystem is inconsistent")?;
    let stats = ixfs.statfs();

    println!(
        "{}: clean, {}/{} inodes, {}/{} blocks",
        args.disk_file.display(),
        stats.used_inodes,
        stats.total_inodes,
        stats.used_blocks,
        stats.total_blocks
    );

    Ok(())
}
