//! CPIO payload codec plus the hardlink-aware extraction pass described in
//! spec.md §4.3.

mod cpio;

pub use cpio::*;

use crate::flags::FileFlags;
use crate::package::FileRecord;
use std::collections::HashMap;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub user: String,
    pub group: String,
    pub flags: u32,
    pub mtime: u32,
    pub digest: String,
    pub mode: u16,
    pub linkname: String,
    pub device: u32,
    pub inode: u32,
}

#[derive(Debug, Default)]
pub struct RPMPayload {
    pub size: u64,
    pub format: String,
    pub compressor: String,
    pub flags: String,
    pub files: Vec<FileInfo>,
}

/// Extract every entry in a cpio "newc" stream under `dest`, materializing
/// `nlink > 1` regular files that share a `(dev, ino)` pair as hardlinks of
/// the first copy instead of writing the content out N times, falling back
/// to a full copy when `link(2)` fails (e.g. cross-device, `EXDEV`).
///
/// The payload format stores full content on every hardlinked entry except
/// the last one sharing its group, per historical cpio convention; we
/// detect the first entry of a group by its `(dev, ino)` key and hardlink
/// every subsequent entry in the group to it.
pub fn extract_payload<R: Read + Seek>(
    reader: &mut R,
    dest: &Path,
    change_owner: bool,
) -> io::Result<Vec<FileEntry>> {
    let mut seen: HashMap<(u32, u32), std::path::PathBuf> = HashMap::new();
    let mut entries = Vec::new();

    loop {
        let key_probe_pos = reader.stream_position()?;
        let entry = FileEntry::read(reader)?;
        if entry.name == "TRAILER!!!" {
            break;
        }

        let key = (entry.dev_major.wrapping_shl(8) | entry.dev_minor, entry.ino);
        let is_hardlink_target = entry.nlink > 1 && entry.kind() == EntryKind::Regular;

        if is_hardlink_target && entry.file_size == 0 {
            if let Some(original) = seen.get(&key) {
                let linked = dest.join(&entry.name);
                if let Some(parent) = linked.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if std::fs::hard_link(original, &linked).is_err() {
                    std::fs::copy(original, &linked)?;
                }
                entries.push(entry);
                continue;
            }
        }

        reader.seek(io::SeekFrom::Start(key_probe_pos))?;
        let (entry, _) = extract_entry(reader, dest, true, change_owner)?;
        if is_hardlink_target {
            seen.entry(key).or_insert_with(|| dest.join(&entry.name));
        }
        entries.push(entry);
    }

    Ok(entries)
}

/// Strip a leading `./`, add a leading `/` if absent, drop a trailing `/`
/// except for the root — the same normalization `Package::files()` applies
/// to header-derived paths, so cpio entry names line up with `FileRecord`
/// lookups by path.
fn normalize_entry_name(name: &str) -> String {
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

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);
const TMP_MAX: u32 = 1000;

/// A `..pyrpm.`-prefixed name in the same directory as `final_path`, per
/// spec.md §4.3/§5 ("a fixed prefix and O_EXCL; collisions retry up to
/// `TMP_MAX` times").
fn temp_sibling(final_path: &Path) -> PathBuf {
    let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("..pyrpm.{}.{n}", std::process::id()))
}

#[cfg(unix)]
fn resolve_owner(record: &FileRecord) -> (Option<nix::unistd::Uid>, Option<nix::unistd::Gid>) {
    let uid = (!record.user.is_empty())
        .then(|| nix::unistd::User::from_name(&record.user).ok().flatten())
        .flatten()
        .map(|u| u.uid);
    let gid = (!record.group.is_empty())
        .then(|| nix::unistd::Group::from_name(&record.group).ok().flatten())
        .flatten()
        .map(|g| g.gid);
    (uid, gid)
}

/// Materialize one non-skipped, non-hardlink-follower cpio entry at
/// `final_path` under a temp sibling name, then `rename` it into place
/// (spec.md §4.3 "crash-atomicity"). `record` supplies the mode, mtime and
/// ownership the main header carries (authoritative over the cpio entry's
/// own fields per spec.md §4.3's "read/verify" note); the cpio entry
/// supplies the name and, for regular files and symlinks, the content.
fn materialize_entry<R: Read>(
    reader: &mut R,
    entry: &FileEntry,
    record: &FileRecord,
    final_path: &Path,
) -> io::Result<()> {
    use crate::payload::cpio::EntryKind;

    let kind = EntryKind::from_mode(record.mode as u32);
    if kind == EntryKind::Socket {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("refusing to extract unix socket {final_path:?}"),
        ));
    }

    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if kind == EntryKind::Directory {
        std::fs::create_dir_all(final_path)?;
        apply_metadata(final_path, record)?;
        return Ok(());
    }

    // Read any streamed content up front so a name collision below can be
    // retried without losing our place in the cpio stream.
    let content = match kind {
        EntryKind::Symlink | EntryKind::Regular => {
            let mut buf = vec![0u8; entry.file_size as usize];
            reader.read_exact(&mut buf)?;
            Some(buf)
        }
        _ => None,
    };

    let mut tmp = temp_sibling(final_path);
    for attempt in 0..TMP_MAX {
        let result: io::Result<()> = match kind {
            EntryKind::Symlink => {
                let target = content.as_deref().unwrap_or_default();
                #[cfg(unix)]
                {
                    std::os::unix::fs::symlink(String::from_utf8_lossy(target).as_ref(), &tmp)
                }
                #[cfg(not(unix))]
                {
                    let _ = target;
                    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks unsupported on this platform"))
                }
            }
            EntryKind::Fifo => mkfifo(&tmp, record.mode),
            EntryKind::CharDevice | EntryKind::BlockDevice => mknod(&tmp, kind, record.mode, record.rdev),
            EntryKind::Regular => {
                use std::fs::OpenOptions;
                OpenOptions::new()
                    .create_new(true)
                    .write(true)
                    .open(&tmp)
                    .and_then(|mut file| file.write_all(content.as_deref().unwrap_or_default()))
            }
            EntryKind::Directory | EntryKind::Socket => unreachable!(),
        };

        match result {
            Ok(()) => break,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt + 1 < TMP_MAX => {
                tmp = temp_sibling(final_path);
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    if kind != EntryKind::Symlink {
        apply_metadata(&tmp, record)?;
    }
    std::fs::rename(&tmp, final_path)
}

#[cfg(unix)]
fn mkfifo(path: &Path, mode: u16) -> io::Result<()> {
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(mode as u32 & 0o7777))
        .map_err(|e| io::Error::from_raw_os_error(e as i32))
}

#[cfg(not(unix))]
fn mkfifo(_path: &Path, _mode: u16) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "fifos unsupported on this platform"))
}

#[cfg(unix)]
fn mknod(path: &Path, kind: crate::payload::cpio::EntryKind, mode: u16, rdev: u32) -> io::Result<()> {
    use crate::payload::cpio::EntryKind as K;
    use nix::sys::stat::{mknod, Mode, SFlag};
    let sflag = match kind {
        K::CharDevice => SFlag::S_IFCHR,
        K::BlockDevice => SFlag::S_IFBLK,
        _ => unreachable!(),
    };
    mknod(
        path,
        sflag,
        Mode::from_bits_truncate(mode as u32 & 0o7777),
        rdev as u64,
    )
    .map_err(|e| io::Error::from_raw_os_error(e as i32))
}

#[cfg(not(unix))]
fn mknod(_path: &Path, _kind: crate::payload::cpio::EntryKind, _mode: u16, _rdev: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "device nodes unsupported on this platform"))
}

fn apply_metadata(path: &Path, record: &FileRecord) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(record.mode as u32))?;
        let (uid, gid) = resolve_owner(record);
        if uid.is_some() || gid.is_some() {
            let _ = nix::unistd::chown(path, uid, gid);
        }
    }
    let mtime = filetime::FileTime::from_unix_time(record.mtime as i64, 0);
    filetime::set_file_mtime(path, mtime)
}

/// Extract a package's cpio payload under `dest`, using `files` (the main
/// header's per-file records, spec.md §4.3) as the authority for mode,
/// mtime, ownership and skip flags — the cpio stream itself supplies only
/// the entry name and, for regular files and symlinks, the content.
///
/// Files flagged `GHOST` or `EXCLUDE` are skipped (their content is still
/// read off the stream to keep it positioned correctly, but nothing is
/// written). Hardlink groups are detected by `(dev, inode)` exactly as in
/// [`extract_payload`]; directories, symlinks, fifos and char/block
/// devices are created via the matching syscall, and UNIX sockets are
/// rejected outright.
pub fn extract_package_payload<R: Read + Seek>(
    reader: &mut R,
    dest: &Path,
    files: &[FileRecord],
) -> io::Result<Vec<FileEntry>> {
    let mut by_path: HashMap<String, &FileRecord> = HashMap::with_capacity(files.len());
    for f in files {
        by_path.insert(f.path.to_string_lossy().into_owned(), f);
    }

    let mut seen: HashMap<(u32, u32), PathBuf> = HashMap::new();
    let mut entries = Vec::new();

    loop {
        let entry = FileEntry::read(reader)?;
        if entry.name == "TRAILER!!!" {
            break;
        }

        let path_key = normalize_entry_name(&entry.name);
        let final_path = dest.join(path_key.trim_start_matches('/'));

        let record = by_path.get(path_key.as_str()).copied();
        let skip = record
            .map(|r| FileFlags::from_bits_truncate(r.flags).intersects(FileFlags::GHOST | FileFlags::EXCLUDE))
            .unwrap_or(false);

        if skip || record.is_none() {
            // No metadata (shouldn't happen for a well-formed package) or
            // explicitly excluded: drain the content so the stream stays
            // aligned, but write nothing.
            let mut sink = io::sink();
            io::copy(&mut reader.by_ref().take(entry.file_size as u64), &mut sink)?;
            let pad = crate::utils::align_n_bytes(entry.file_size, 4);
            reader.seek(io::SeekFrom::Current(pad as i64))?;
            entries.push(entry);
            continue;
        }
        let record = record.unwrap();

        let key = (entry.dev_major.wrapping_shl(8) | entry.dev_minor, entry.ino);
        let is_hardlink_member = entry.nlink > 1 && entry.file_size == 0
            && crate::payload::cpio::EntryKind::from_mode(record.mode as u32) == crate::payload::cpio::EntryKind::Regular;

        if is_hardlink_member {
            if let Some(original) = seen.get(&key) {
                if let Some(parent) = final_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if std::fs::hard_link(original, &final_path).is_err() {
                    std::fs::copy(original, &final_path)?;
                }
                entries.push(entry);
                continue;
            }
        }

        materialize_entry(reader, &entry, record, &final_path)?;
        let pad = crate::utils::align_n_bytes(entry.file_size, 4);
        reader.seek(io::SeekFrom::Current(pad as i64))?;

        if entry.nlink > 1 {
            seen.entry(key).or_insert_with(|| final_path.clone());
        }
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod package_extract_tests {
    use super::*;
    use std::io::Cursor;

    fn file_record(path: &str, mode: u16, flags: u32) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            mode,
            mtime: 0,
            size: 0,
            md5: String::new(),
            linkto: String::new(),
            dev: 0,
            inode: 0,
            flags,
            user: String::new(),
            group: String::new(),
            rdev: 0,
            color: 0,
            lang: String::new(),
            verify_flags: 0,
        }
    }

    fn cpio_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (name, data) in entries {
            let entry = FileEntry {
                name: name.to_string(),
                ino: 0,
                mode: 0o100644,
                uid: 0,
                gid: 0,
                nlink: 1,
                mtime: 0,
                file_size: data.len() as u32,
                dev_major: 0,
                dev_minor: 0,
                rdev_major: 0,
                rdev_minor: 0,
            };
            buf.write_cpio_record(entry, &mut Cursor::new(data.to_vec())).unwrap();
        }
        buf.write_cpio_entry(FileEntry::default()).unwrap();
        buf
    }

    #[test]
    fn ghost_file_is_skipped_but_stream_stays_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = cpio_bytes(&[("./etc/ghostly", b"ignored"), ("./etc/real", b"hello")]);
        let files = vec![
            file_record("/etc/ghostly", 0o100644, FileFlags::GHOST.bits()),
            file_record("/etc/real", 0o100644, 0),
        ];

        let mut cursor = Cursor::new(bytes);
        extract_package_payload(&mut cursor, dir.path(), &files).unwrap();

        assert!(!dir.path().join("etc/ghostly").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("etc/real")).unwrap(), "hello");
    }

    #[test]
    fn regular_file_extracted_atomically_leaves_no_temp_name() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = cpio_bytes(&[("./usr/bin/tool", b"binary-contents")]);
        let files = vec![file_record("/usr/bin/tool", 0o100755, 0)];

        let mut cursor = Cursor::new(bytes);
        extract_package_payload(&mut cursor, dir.path(), &files).unwrap();

        let final_path = dir.path().join("usr/bin/tool");
        assert_eq!(std::fs::read_to_string(&final_path).unwrap(), "binary-contents");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("usr/bin"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("..pyrpm."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
