use clap::Parser;
use rpm_core::Package;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::exit;

#[derive(Debug, Parser)]
#[command(name = "rpm2cpio")]
struct Args {
    /// Path to rpm file
    #[arg(name = "rpm")]
    path: PathBuf,

    /// Path to save file
    #[arg(long = "output")]
    output: PathBuf,
}

fn run(args: Args) -> io::Result<()> {
    let pkg = Package::open(&args.path).map_err(io::Error::other)?;
    let mut reader = pkg.open_decompressed_payload()?;
    let mut writer = OpenOptions::new().create(true).write(true).truncate(true).open(&args.output)?;
    io::copy(&mut reader, &mut writer)?;
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("{}", err);
        exit(1);
    }
}
