use chrono::{Local, TimeZone};
use clap::Parser;
use rpm_core::header::Tag;
use rpm_core::Package;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::exit;

#[derive(Debug, Parser)]
#[command(name = "rpm-info")]
struct Args {
    /// Path to data file
    #[arg(name = "path")]
    path: PathBuf,

    /// Show internal debug information
    #[arg(long = "debug", short = 'd')]
    debug: bool,
}

struct Summary {
    name: String,
    version: String,
    release: String,
    arch: String,
    group: String,
    size: u64,
    license: String,
    source_rpm: String,
    build_time: i64,
    build_host: String,
    summary: String,
    description: String,
}

impl From<&Package> for Summary {
    fn from(pkg: &Package) -> Self {
        let h = &pkg.header.main;
        Summary {
            name: pkg.name.clone(),
            version: pkg.evr.version.clone(),
            release: pkg.evr.release.clone(),
            arch: pkg.arch.clone(),
            group: h.get::<String>(Tag::Group),
            size: h.get::<u64>(Tag::Size),
            license: h.get::<String>(Tag::License),
            source_rpm: h.get::<String>(Tag::SourceRpm),
            build_time: h.get::<u64>(Tag::BuildTime) as i64,
            build_host: h.get::<String>(Tag::BuildHost),
            summary: h.get::<String>(Tag::Summary),
            description: h.get::<String>(Tag::Description),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let build_time = Local
            .timestamp_opt(self.build_time, 0)
            .single()
            .map(|t| t.format("%c").to_string())
            .unwrap_or_default();

        writeln!(f, "Name        : {}", self.name)?;
        writeln!(f, "Version     : {}", self.version)?;
        writeln!(f, "Release     : {}", self.release)?;
        writeln!(f, "Architecture: {}", self.arch)?;
        writeln!(f, "Group       : {}", self.group)?;
        writeln!(f, "Size        : {}", self.size)?;
        writeln!(f, "License     : {}", self.license)?;
        writeln!(f, "Source RPM  : {}", self.source_rpm)?;
        writeln!(f, "Build Date  : {}", build_time)?;
        writeln!(f, "Build Host  : {}", self.build_host)?;
        writeln!(f, "Summary     : {}", self.summary)?;
        writeln!(f, "Description : \n{}", self.description)
    }
}

fn run(args: Args) -> io::Result<()> {
    let pkg = Package::open(&args.path).map_err(io::Error::other)?;
    let info = Summary::from(&pkg);

    if args.debug {
        println!("{:#?}", pkg.header.signature);
        println!("{:#?}", pkg.header.main);
    }
    println!("{}", info);
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
