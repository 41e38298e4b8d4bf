//! Host tool for flat FAT disk images.

mod logger;

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use flatfs::{format, BlockDevice, FileDisk, FsError, MountSlot, Superblock, Volume};

const USAGE: &str = "\
usage: fs_tool <command> <disk> [arg]

commands:
  mkfs <disk> <data_blocks>   create and format a disk image
  info <disk>                 print volume geometry and occupancy
  ls   <disk>                 list files
  add  <disk> <host_file>     copy a host file into the volume
  rm   <disk> <name>          delete a file
  cat  <disk> <name>          print a file to stdout
  stat <disk> <name>          print a file's size

Set FLATFS_LOG=error|warn|info|debug|trace to adjust logging.";

const READ_CHUNK: usize = 4096;

#[derive(Debug, thiserror::Error)]
enum ToolError {
    #[error("invalid arguments")]
    Usage,
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("{path}: {source}")]
    Host { path: String, source: io::Error },
    #[error("short write: {written} of {len} bytes")]
    ShortWrite { written: usize, len: usize },
}

fn main() -> ExitCode {
    if let Err(err) = logger::init() {
        eprintln!("warning: logger unavailable: {err}");
    }
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(ToolError::Usage) => {
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<(), ToolError> {
    let [command, disk, rest @ ..] = args else {
        return Err(ToolError::Usage);
    };
    match (command.as_str(), rest) {
        ("mkfs", [data_blocks]) => mkfs(disk, data_blocks),
        ("info", []) => with_volume(disk, |vol| {
            println!("{}", vol.info());
            match vol.check() {
                Ok(()) => log::debug!("consistency check passed"),
                Err(err) => log::warn!("consistency check failed: {err}"),
            }
            Ok(())
        }),
        ("ls", []) => with_volume(disk, |vol| {
            println!("FS Ls:");
            for entry in vol.list() {
                println!("{entry}");
            }
            Ok(())
        }),
        ("add", [host_file]) => add(disk, host_file),
        ("rm", [name]) => with_volume(disk, |vol| Ok(vol.delete(name)?)),
        ("cat", [name]) => with_volume(disk, |vol| cat(vol, name)),
        ("stat", [name]) => with_volume(disk, |vol| {
            println!("Size of file '{name}' is {} bytes", vol.stat_name(name)?);
            Ok(())
        }),
        _ => Err(ToolError::Usage),
    }
}

/// Mounts `disk`, runs `op` and unmounts. An error from `op` wins over an
/// unmount error.
fn with_volume<T>(
    disk: &str,
    op: impl FnOnce(&mut Volume<FileDisk>) -> Result<T, ToolError>,
) -> Result<T, ToolError> {
    let mut slot = MountSlot::new();
    slot.mount_path(disk)?;
    let result = slot.volume_mut().map_err(ToolError::from).and_then(op);
    let unmounted = slot.unmount();
    let value = result?;
    unmounted?;
    Ok(value)
}

fn mkfs(disk: &str, data_blocks: &str) -> Result<(), ToolError> {
    let data_blocks: usize = data_blocks.parse().map_err(|_| ToolError::Usage)?;
    let sb = Superblock::for_data_blocks(data_blocks)?;
    let mut device = FileDisk::create(disk, sb.total_blocks as u64).map_err(FsError::from)?;
    format(&mut device, data_blocks)?;
    println!(
        "Created '{disk}': {} blocks, {} data blocks",
        device.block_count(),
        sb.data_blocks
    );
    Ok(())
}

fn add(disk: &str, host_file: &str) -> Result<(), ToolError> {
    let data = fs::read(host_file).map_err(|source| ToolError::Host {
        path: host_file.to_owned(),
        source,
    })?;
    let name = Path::new(host_file)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(ToolError::Fs(FsError::InvalidName))?;
    with_volume(disk, |vol| {
        vol.create(name)?;
        let fd = vol.open(name)?;
        let written = vol.write(fd, &data);
        vol.close(fd)?;
        let written = written?;
        println!("Wrote file '{name}' ({written}/{} bytes)", data.len());
        if written < data.len() {
            return Err(ToolError::ShortWrite {
                written,
                len: data.len(),
            });
        }
        Ok(())
    })
}

fn cat(vol: &mut Volume<FileDisk>, name: &str) -> Result<(), ToolError> {
    let fd = vol.open(name)?;
    let result = copy_out(vol, fd);
    vol.close(fd)?;
    result
}

fn copy_out(vol: &mut Volume<FileDisk>, fd: flatfs::Fd) -> Result<(), ToolError> {
    let host_error = |source| ToolError::Host {
        path: "<stdout>".to_owned(),
        source,
    };
    let mut out = io::stdout().lock();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let count = vol.read(fd, &mut buf)?;
        if count == 0 {
            break;
        }
        out.write_all(&buf[..count]).map_err(host_error)?;
    }
    out.flush().map_err(host_error)
}
