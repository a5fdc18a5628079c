use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use ixfs::disk_format::superblock::SuperBlock;
use ixfs::storage::FileBackedStorage;
use ixfs::{Config, Ixfs};

#[derive(Parser, Debug, PartialEq)]
#[command(about = "Work with an ixfs disk image")]
struct Args {
    /// ixfs disk file
    disk_file: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Create a new, empty filesystem, replacing the image's contents
    Format {
        #[arg(long, default_value_t = 1024)]
        block_size: u32,
        #[arg(long, default_value_t = 64)]
        inode_size: u32,
        /// Number of inodes
        #[arg(long, default_value_t = 1024)]
        inodes: u32,
        /// Total number of blocks, metadata included
        #[arg(long, default_value_t = 1024)]
        blocks: u32,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file, link or empty directory
    Rm {
        /// Remove directories and their contents
        #[arg(short, long)]
        recursive: bool,
        path: String,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create an empty file
    Touch { path: String },
    /// Replace a file's contents with DATA, or with standard input
    Write { path: String, data: Option<String> },
    /// Print a file's contents
    Cat { path: String },
    /// Link LINK to TARGET
    Ln {
        /// Make a symbolic link
        #[arg(short, long)]
        symbolic: bool,
        target: String,
        link: String,
    },
    /// Show an inode's metadata
    Stat { path: String },
    /// Show inode and block usage
    Df,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    if let Command::Format {
        block_size,
        inode_size,
        inodes,
        blocks,
    } = args.command
    {
        let config = Config {
            block_size,
            inode_size,
            inode_count: inodes,
            block_count: blocks,
        };
        return format(&args.disk_file, &config);
    }

    let disk_file = File::options()
        .read(true)
        .write(true)
        .open(&args.disk_file)
        .context("unable to open disk file in read-write mode")?;
    let storage = FileBackedStorage::open_formatted(disk_file)?;
    let mut ixfs = Ixfs::mount(storage).context("unable to mount disk file")?;

    run(&mut ixfs, args.command)?;

    ixfs.unmount().context("unable to write back the filesystem")?;
    Ok(())
}

fn format(path: &Path, config: &Config) -> Result<()> {
    // an existing image is only replaced by a configuration that can be laid out
    SuperBlock::new(config).context("invalid filesystem configuration")?;

    let disk_file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .context("unable to create disk file")?;

    let storage = FileBackedStorage::create(
        disk_file,
        config.block_size as usize,
        config.block_count as usize,
    )?;
    let ixfs = Ixfs::format(storage, config)?;
    let stats = ixfs.statfs();
    ixfs.unmount()?;

    println!(
        "formatted {}: {} inodes, {} data blocks of {} bytes",
        path.display(),
        stats.total_inodes,
        stats.total_blocks,
        stats.block_size
    );
    Ok(())
}

fn run(ixfs: &mut Ixfs<FileBackedStorage>, command: Command) -> Result<()> {
    match command {
        Command::Format { .. } => bail!("format does not run on a mounted filesystem"),
        Command::Mkdir { path } => {
            ixfs.create_directory(&path)?;
        }
        Command::Rm { recursive, path } => ixfs.remove(&path, recursive)?,
        Command::Ls { path } => {
            for entry in ixfs.list(&path)? {
                println!("{:>5} {:<9} {}", entry.inum, format!("{:?}", entry.kind), entry.name);
            }
        }
        Command::Touch { path } => {
            if ixfs.resolve(&path).is_err() {
                ixfs.create_file(&path)?;
            }
        }
        Command::Write { path, data } => {
            let data = match data {
                Some(data) => data.into_bytes(),
                None => {
                    let mut buffer = Vec::new();
                    io::stdin()
                        .read_to_end(&mut buffer)
                        .context("unable to read standard input")?;
                    buffer
                }
            };

            ixfs.write_file(&path, &data)?;
        }
        Command::Cat { path } => {
            let data = ixfs.read_file(&path)?;
            io::stdout().write_all(&data)?;
        }
        Command::Ln {
            symbolic,
            target,
            link,
        } => {
            ixfs.link(&target, &link, symbolic)?;
        }
        Command::Stat { path } => {
            let metadata = ixfs.stat(&path)?;
            println!("inode: {}", metadata.inum);
            println!("kind:  {:?}", metadata.kind);
            println!("mode:  {:o}", metadata.mode);
            println!("size:  {}", metadata.size);
            println!("links: {}", metadata.nlink);
            println!("blocks: {}", metadata.blocks);
        }
        Command::Df => {
            let stats = ixfs.statfs();
            println!(
                "inodes: {} used, {} free, {} total",
                stats.used_inodes,
                stats.free_inodes(),
                stats.total_inodes
            );
            println!(
                "blocks: {} used, {} free, {} total ({} bytes each)",
                stats.used_blocks,
                stats.free_blocks(),
                stats.total_blocks,
                stats.block_size
            );
        }
    }

    Ok(())
}
