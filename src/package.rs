//! Package object: a `Header` plus derived, lazily reconstructed views
//! over its files, dependencies, triggers and scriptlets — spec.md §3/§4.2.

use crate::error::{FormatError, SchemaError};
use crate::flags::DependencyFlags;
use crate::header::{Header, RType, Tag};
use crate::version::Evr;
use itertools::izip;
use log::debug;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

/// `(name, flags, evr)` — a single provide/require/conflict/obsolete entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub flags: DependencyFlags,
    pub evr: Evr,
}

impl Dependency {
    pub fn new(name: impl Into<String>, flags: DependencyFlags, evr: Evr) -> Self {
        Dependency {
            name: name.into(),
            flags,
            evr,
        }
    }

    /// rpmlib()/config() pseudo-dependencies never name a real package and
    /// are dropped before resolution, per `pyrpm`'s `getPkgDependencies`.
    pub fn is_pseudo(&self) -> bool {
        self.flags.is_pseudo() || self.name.starts_with("rpmlib(") || self.name.starts_with("config(")
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.flags.sense().is_empty() {
            write!(f, " {}", self.evr)?;
        }
        Ok(())
    }
}

/// Per-file record reconstructed from the main header's parallel file-info
/// arrays (spec.md §3).
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub mode: u16,
    pub mtime: u32,
    pub size: u64,
    pub md5: String,
    pub linkto: String,
    pub dev: u32,
    pub inode: u32,
    pub flags: u32,
    pub user: String,
    pub group: String,
    pub rdev: u32,
    /// Multilib color, used by the file-conflict exception in §4.4.
    pub color: u32,
    pub lang: String,
    pub verify_flags: u32,
}

/// One trigger script body owned by a package.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub name: String,
    pub sense_flags: DependencyFlags,
    pub evr: Evr,
    pub interp: String,
    pub script: String,
}

#[derive(Debug, Clone, Default)]
pub struct Scriptlets {
    pub pre: Option<(String, String)>,
    pub post: Option<(String, String)>,
    pub preun: Option<(String, String)>,
    pub postun: Option<(String, String)>,
    pub pretrans: Option<(String, String)>,
    pub posttrans: Option<(String, String)>,
    pub verify: Option<(String, String)>,
}

pub struct Package {
    pub header: Header,
    pub name: String,
    pub evr: Evr,
    pub arch: String,
    pub provides: Vec<Dependency>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub obsoletes: Vec<Dependency>,
    pub triggers: Vec<Trigger>,
    pub scriptlets: Scriptlets,
    files: Vec<FileRecord>,
    source: Option<PathBuf>,
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package").field("nevra", &self.nevra()).finish()
    }
}

fn str_array(h: &Header, tag: Tag) -> Vec<String> {
    h.main.get_opt(tag).and_then(RType::as_string_array).unwrap_or_default()
}

fn u32_array(h: &Header, tag: Tag) -> Vec<u32> {
    h.main.get_opt(tag).and_then(RType::as_u32_array).unwrap_or_default()
}

fn u64_array(h: &Header, tag: Tag) -> Vec<u64> {
    h.main
        .get_opt(tag)
        .and_then(RType::as_u64_array)
        .unwrap_or_else(|| u32_array(h, tag).into_iter().map(u64::from).collect())
}

fn deps_from_tags(
    h: &Header,
    name_tag: Tag,
    flags_tag: Tag,
    version_tag: Tag,
) -> Vec<Dependency> {
    let names = str_array(h, name_tag);
    let flags = u32_array(h, flags_tag);
    let versions = str_array(h, version_tag);

    izip!(names, flags, versions)
        .map(|(name, flag, version)| {
            let evr = parse_evr(&version);
            Dependency::new(name, DependencyFlags::from_bits_truncate(flag), evr)
        })
        .collect()
}

/// Parse a `[epoch:]version[-release]` string as stored in a dependency's
/// version tag (not the package's own split Epoch/Version/Release tags).
fn parse_evr(s: &str) -> Evr {
    if s.is_empty() {
        return Evr::default();
    }
    let (epoch, rest) = match s.split_once(':') {
        Some((e, r)) => (e.parse::<u32>().ok(), r),
        None => (None, s),
    };
    let (version, release) = match rest.split_once('-') {
        Some((v, r)) => (v.to_string(), r.to_string()),
        None => (rest.to_string(), String::new()),
    };
    Evr::new(epoch, version, release)
}

impl Package {
    pub fn from_header(header: Header, source: Option<PathBuf>) -> Result<Self, SchemaError> {
        let name = header.main.get::<String>(Tag::Name);
        let version = header.main.get::<String>(Tag::Version);
        let release = header.main.get::<String>(Tag::Release);
        let epoch = header
            .main
            .get_opt(Tag::Epoch)
            .and_then(RType::as_u32);
        let arch = header.main.get::<String>(Tag::Arch);

        if name.is_empty() {
            return Err(SchemaError::UnknownTag(Tag::Name as u32));
        }

        let provides = deps_from_tags(&header, Tag::ProvideName, Tag::Provideflags, Tag::Provideversion);
        let requires = deps_from_tags(&header, Tag::RequireName, Tag::RequireFlags, Tag::RequireVersion);
        let conflicts = deps_from_tags(&header, Tag::Conflictname, Tag::Conflictflags, Tag::Conflictversion);
        let obsoletes = deps_from_tags(&header, Tag::Obsoletename, Tag::Obsoleteflags, Tag::Obsoleteversion);

        let triggers = read_triggers(&header);
        let scriptlets = read_scriptlets(&header);
        let files = reconstruct_files(&header);

        Ok(Package {
            header,
            name,
            evr: Evr::new(epoch, version, release),
            arch,
            provides,
            requires,
            conflicts,
            obsoletes,
            triggers,
            scriptlets,
            files,
            source,
        })
    }

    pub fn read<R: Read + Seek>(fh: &mut R, source: Option<PathBuf>) -> Result<Self, FormatError> {
        let header = Header::read(fh)?;
        Package::from_header(header, source)
            .map_err(|e| FormatError::MalformedHeader(e.to_string()))
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| FormatError::MalformedLead(e.to_string()))?;
        let mut reader = BufReader::new(file);
        Package::read(&mut reader, Some(path))
    }

    pub fn nevra(&self) -> String {
        format!("{}-{}-{}.{}", self.name, self.evr.version, self.evr.release, self.arch)
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Open a fresh reader positioned at the start of the compressed cpio
    /// payload stream, for lazy extraction.
    pub fn open_payload(&self) -> std::io::Result<BufReader<File>> {
        let path = self.source.as_ref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "package has no backing file")
        })?;
        let mut file = File::open(path)?;
        file.seek(std::io::SeekFrom::Start(self.header.payload_offset))?;
        Ok(BufReader::new(file))
    }

    pub fn non_pseudo_requires(&self) -> impl Iterator<Item = &Dependency> {
        self.requires.iter().filter(|d| !d.is_pseudo())
    }

    /// Decompress the whole cpio payload per `RPMTAG_PAYLOADCOMPRESSOR`
    /// into memory, returning a `Seek`-able cursor over the raw archive
    /// bytes — [`crate::payload::extract_payload`] needs to seek back over
    /// an entry header while probing hardlink groups, which none of the
    /// streaming decompressors support directly.
    pub fn open_decompressed_payload(&self) -> std::io::Result<std::io::Cursor<Vec<u8>>> {
        let reader = self.open_payload()?;
        let compressor = self
            .header
            .main
            .get_opt(Tag::Payloadcompressor)
            .and_then(RType::as_string)
            .unwrap_or_else(|| "gzip".to_string());

        let mut decoder: Box<dyn Read> = match compressor.as_str() {
            "gzip" => Box::new(flate2::read::GzDecoder::new(reader)),
            "bzip2" => Box::new(bzip2::read::BzDecoder::new(reader)),
            "zstd" => Box::new(zstd::stream::read::Decoder::new(reader)?),
            "xz" | "lzma" => Box::new(xz2::read::XzDecoder::new(reader)),
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("unsupported payload compressor {other:?}"),
                ))
            }
        };

        let mut buf = Vec::with_capacity(self.size() as usize);
        decoder.read_to_end(&mut buf)?;
        Ok(std::io::Cursor::new(buf))
    }

    pub fn size(&self) -> u64 {
        self.header
            .main
            .get_opt(Tag::Longsize)
            .and_then(RType::as_u64)
            .unwrap_or_else(|| self.header.main.get::<u32>(Tag::Size) as u64)
    }

    /// Verify the signature header's `Sha1header`/`Sigmd5` digests against
    /// the bytes actually on disk: SHA1 over the main header region alone,
    /// MD5 over the main header followed by the (still-compressed) payload
    /// — the same two digests real rpm computes at `Sigtag` time. Advisory
    /// per spec.md §7: callers skip this entirely when `nodigest` is set.
    pub fn verify_digests(&self) -> Result<(), FormatError> {
        let Some(path) = self.source.as_ref() else {
            return Ok(());
        };
        let mut file = File::open(path).map_err(|e| FormatError::MalformedPayload(e.to_string()))?;

        let header_len = (self.header.payload_offset - self.header.main_header_start) as usize;
        let mut header_bytes = vec![0_u8; header_len];
        file.seek(std::io::SeekFrom::Start(self.header.main_header_start))
            .map_err(|e| FormatError::MalformedPayload(e.to_string()))?;
        file.read_exact(&mut header_bytes)
            .map_err(|e| FormatError::MalformedPayload(e.to_string()))?;

        if let Some(expected_hex) = self.header.signature.get_opt(Tag::Sha1header).and_then(RType::as_string) {
            use sha1::Digest;
            let actual = hex::encode(sha1::Sha1::digest(&header_bytes));
            if !actual.eq_ignore_ascii_case(&expected_hex) {
                return Err(FormatError::DigestMismatch {
                    path: "Sha1header".to_string(),
                    expected: expected_hex,
                    actual,
                });
            }
        }

        if let Some(expected_bin) = self.header.signature.get_opt(Tag::Sigmd5).and_then(RType::as_bin) {
            let mut ctx = md5::Context::new();
            ctx.consume(&header_bytes);
            std::io::copy(&mut file, &mut Md5Sink(&mut ctx))
                .map_err(|e| FormatError::MalformedPayload(e.to_string()))?;
            let actual = ctx.compute();
            if actual.0.as_slice() != expected_bin {
                return Err(FormatError::DigestMismatch {
                    path: "Sigmd5".to_string(),
                    expected: hex::encode(expected_bin),
                    actual: hex::encode(actual.0),
                });
            }
        }

        Ok(())
    }
}

/// `md5::Context::consume` takes `&[u8]`, not a `Write` impl — this adapts
/// it so `io::copy` can stream the payload into the digest without
/// buffering the whole (possibly large) file in memory.
struct Md5Sink<'a>(&'a mut md5::Context);

impl std::io::Write for Md5Sink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.consume(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn reconstruct_files(h: &Header) -> Vec<FileRecord> {
    let old = str_array(h, Tag::OldFileNames);
    let names: Vec<String> = if !old.is_empty() {
        old
    } else {
        let dirnames = str_array(h, Tag::DirNames);
        let dirindexes = u32_array(h, Tag::Dirindexes);
        let basenames = str_array(h, Tag::Basenames);
        izip!(dirindexes, basenames)
            .map(|(di, base)| {
                let dir = dirnames.get(di as usize).cloned().unwrap_or_default();
                format!("{dir}{base}")
            })
            .collect()
    };

    let count = names.len();
    let long_sizes = u64_array(h, Tag::Longfilesizes);
    let sizes = pad(
        if !long_sizes.is_empty() { long_sizes } else { u32_array(h, Tag::FileSizes).into_iter().map(u64::from).collect() },
        count,
    );
    let modes = pad(u32_array(h, Tag::FileModes), count);
    let mtimes = pad(u32_array(h, Tag::FileMTimes), count);
    let md5s = pad(str_array(h, Tag::FileMD5s), count);
    let linktos = pad(str_array(h, Tag::FileLinktos), count);
    // `FileDevices` is the device the file itself resides on (paired with
    // `FileInodes` for hardlink-group detection); `FilerDevs` is the rdev of
    // a device-special file — distinct tags, easy to swap by accident.
    let devs = pad(u32_array(h, Tag::FileDevices), count);
    let rdevs = pad(u32_array(h, Tag::FilerDevs), count);
    let inodes = pad(u32_array(h, Tag::FileInodes), count);
    let flags = pad(u32_array(h, Tag::FileFlags), count);
    let users = pad(str_array(h, Tag::FileUserName), count);
    let groups = pad(str_array(h, Tag::FileGroupName), count);
    let colors = pad(u32_array(h, Tag::Filecolors), count);
    let langs = pad(str_array(h, Tag::FileLangs), count);
    let verifies = pad(u32_array(h, Tag::FileVerifyFlags), count);

    (0..count)
        .map(|i| FileRecord {
            path: PathBuf::from(normalize_file_path(&names[i])),
            mode: modes[i] as u16,
            mtime: mtimes[i],
            size: sizes[i],
            md5: md5s[i].clone(),
            linkto: linktos[i].clone(),
            dev: devs[i],
            inode: inodes[i],
            flags: flags[i],
            user: users[i].clone(),
            group: groups[i].clone(),
            rdev: rdevs[i],
            color: colors[i],
            lang: langs[i].clone(),
            verify_flags: verifies[i],
        })
        .collect()
}

/// Per spec.md §4.3: strip a leading `./`, insert a leading `/` if absent,
/// and strip a trailing `/` except for the root path itself.
fn normalize_file_path(name: &str) -> String {
    let stripped = name.strip_prefix("./").unwrap_or(name);
    let mut out = if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    };
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn pad<T: Default + Clone>(mut v: Vec<T>, len: usize) -> Vec<T> {
    v.resize(len, T::default());
    v
}

fn read_triggers(h: &Header) -> Vec<Trigger> {
    let names = str_array(h, Tag::Triggername);
    let flags = u32_array(h, Tag::Triggerflags);
    let versions = str_array(h, Tag::Triggerversion);
    let indexes = u32_array(h, Tag::Triggerindex);
    let scripts = str_array(h, Tag::Triggerscripts);
    let progs = str_array(h, Tag::Triggerscriptprog);

    izip!(names, flags, versions, indexes)
        .map(|(name, flag, version, idx)| {
            let evr = parse_evr(&version);
            Trigger {
                name,
                sense_flags: DependencyFlags::from_bits_truncate(flag),
                evr,
                interp: progs.get(idx as usize).cloned().unwrap_or_else(|| "/bin/sh".into()),
                script: scripts.get(idx as usize).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

fn read_scriptlets(h: &Header) -> Scriptlets {
    let prog = |tag: Tag| -> String {
        h.main.get_opt(tag).and_then(RType::as_string).unwrap_or_else(|| "/bin/sh".into())
    };
    let body = |tag: Tag| -> Option<String> { h.main.get_opt(tag).and_then(RType::as_string) };

    let pair = |body_tag: Tag, prog_tag: Tag| -> Option<(String, String)> {
        body(body_tag).map(|b| (prog(prog_tag), b))
    };

    Scriptlets {
        pre: pair(Tag::PreIn, Tag::Preinprog),
        post: pair(Tag::PostIn, Tag::Postinprog),
        preun: pair(Tag::PreUn, Tag::Preunprog),
        postun: pair(Tag::PostUn, Tag::Postunprog),
        pretrans: pair(Tag::Pretrans, Tag::Pretransprog),
        posttrans: pair(Tag::Posttrans, Tag::Posttransprog),
        verify: pair(Tag::Verifyscript, Tag::Verifyscriptprog),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evr_parsing_handles_epoch_and_release() {
        assert_eq!(parse_evr("1:2.3-4"), Evr::new(Some(1), "2.3", "4"));
        assert_eq!(parse_evr("2.3"), Evr::new(None, "2.3", ""));
        assert_eq!(parse_evr(""), Evr::default());
    }

    #[test]
    fn normalize_strips_dot_slash_and_trailing_slash() {
        assert_eq!(normalize_file_path("./usr/bin/"), "/usr/bin");
        assert_eq!(normalize_file_path("usr/bin"), "/usr/bin");
        assert_eq!(normalize_file_path("/"), "/");
    }

    #[test]
    fn pseudo_dependency_filtering() {
        let d = Dependency::new("rpmlib(CompressedFileNames)", DependencyFlags::RPMLIB, Evr::default());
        assert!(d.is_pseudo());
        let d2 = Dependency::new("libc.so.6", DependencyFlags::empty(), Evr::default());
        assert!(!d2.is_pseudo());
    }

    fn digest_fixture(sha1_tag: Option<String>, md5_tag: Option<Vec<u8>>) -> (tempfile::NamedTempFile, Package) {
        use std::io::Write as _;

        let header_bytes = b"main-header-bytes".to_vec();
        let payload_bytes = b"cpio-payload-bytes".to_vec();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&header_bytes).unwrap();
        file.write_all(&payload_bytes).unwrap();
        file.flush().unwrap();

        let mut signature = crate::header::Tags::default();
        if let Some(hex) = sha1_tag {
            signature.insert(Tag::Sha1header, RType::String(hex));
        }
        if let Some(bin) = md5_tag {
            signature.insert(Tag::Sigmd5, RType::Bin(bin));
        }

        let mut main = crate::header::Tags::default();
        main.insert(Tag::Name, RType::String("digest-test".to_string()));
        main.insert(Tag::Version, RType::String("1".to_string()));
        main.insert(Tag::Release, RType::String("1".to_string()));
        main.insert(Tag::Arch, RType::String("x86_64".to_string()));

        let header = crate::header::Header {
            lead: crate::header::HeaderLead::default(),
            signature,
            main,
            main_header_start: 0,
            payload_offset: header_bytes.len() as u64,
        };
        let pkg = Package::from_header(header, Some(file.path().to_path_buf())).unwrap();
        (file, pkg)
    }

    #[test]
    fn verify_digests_accepts_matching_sha1_and_md5() {
        use sha1::Digest as _;
        let header_bytes = b"main-header-bytes";
        let payload_bytes = b"cpio-payload-bytes";
        let sha1_hex = hex::encode(sha1::Sha1::digest(header_bytes));
        let mut ctx = md5::Context::new();
        ctx.consume(header_bytes);
        ctx.consume(payload_bytes);
        let md5_bytes = ctx.compute().0.to_vec();

        let (_file, pkg) = digest_fixture(Some(sha1_hex), Some(md5_bytes));
        assert!(pkg.verify_digests().is_ok());
    }

    #[test]
    fn verify_digests_rejects_wrong_sha1() {
        let (_file, pkg) = digest_fixture(Some("0".repeat(40)), None);
        let err = pkg.verify_digests().unwrap_err();
        assert!(matches!(err, FormatError::DigestMismatch { .. }));
    }

    #[test]
    fn verify_digests_rejects_wrong_md5() {
        let (_file, pkg) = digest_fixture(None, Some(vec![0_u8; 16]));
        let err = pkg.verify_digests().unwrap_err();
        assert!(matches!(err, FormatError::DigestMismatch { .. }));
    }

    #[test]
    fn verify_digests_is_noop_without_backing_file() {
        let mut main = crate::header::Tags::default();
        main.insert(Tag::Name, RType::String("no-source".to_string()));
        main.insert(Tag::Version, RType::String("1".to_string()));
        main.insert(Tag::Release, RType::String("1".to_string()));
        main.insert(Tag::Arch, RType::String("x86_64".to_string()));
        let header = crate::header::Header {
            lead: crate::header::HeaderLead::default(),
            signature: crate::header::Tags::default(),
            main,
            main_header_start: 0,
            payload_offset: 0,
        };
        let pkg = Package::from_header(header, None).unwrap();
        assert!(pkg.verify_digests().is_ok());
    }
}
