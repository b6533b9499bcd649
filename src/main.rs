use std::env;
use std::process::ExitCode;

use fuser::MountOption;
use log::error;

use minifs::fuse::FuseDriver;
use minifs::{FileDrive, FsSession};

const SECTOR_SIZE: usize = 512;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("mkfs") if args.len() == 4 => mkfs(&args[2], &args[3]),
        Some("mount") if args.len() == 4 => mount(&args[2], &args[3]),
        _ => {
            eprintln!("usage: minifs mkfs <image> <size-kib>");
            eprintln!("       minifs mount <image> <mountpoint>");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn mkfs(image: &str, size_kib: &str) -> Result<(), Box<dyn std::error::Error>> {
    let kib: u64 = size_kib.parse()?;
    let drive = FileDrive::create(image, kib * 1024, SECTOR_SIZE)?;
    let session = FsSession::format(drive)?;
    session.unmount()?;
    println!("formatted {} ({} KiB)", image, kib);
    Ok(())
}

fn mount(image: &str, mountpoint: &str) -> Result<(), Box<dyn std::error::Error>> {
    let drive = FileDrive::open(image, SECTOR_SIZE)?;
    let session = FsSession::mount(drive)?;
    let options = vec![MountOption::FSName("minifs".to_string())];
    fuser::mount2(FuseDriver::new(session), mountpoint, &options)?;
    Ok(())
}
