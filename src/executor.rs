//! Transaction executor: batches ordered steps across a fork boundary so
//! filesystem mutations happen in a disposable child while the parent
//! keeps sole ownership of the database — spec.md §4.7/§5.
//!
//! `ProcessHost` is the REDESIGN FLAG'd capability seam (spec.md §9) that
//! lets the scheduler run against a `MockProcessHost` in tests instead of
//! a real `fork`/`waitpid`/`chroot`. Grounded in `pyrpm`'s `RpmController`
//! batch loop; `nix` already covers `user`/`fs` for the teacher crate, so
//! `fork`/`waitpid` is the same ecosystem crate's `process` feature, not a
//! new dependency.

use crate::config::Config;
use crate::database::{Database, PackageId};
use crate::error::{Error, ExecuteError};
use crate::orderer::{Operation, Step};
use crate::package::Package;
use crate::payload::extract_package_payload;
use crate::trigger::TriggerEngine;
use std::io;
use std::path::{Path, PathBuf};

/// Abstracts fork+waitpid+chroot+scriptlet-exec so the batch scheduler is
/// testable without spawning a real process.
pub trait ProcessHost: Send + Sync {
    /// Run `body` to completion "as if" forked: on success the host
    /// returns `Ok(())`; on failure it returns the child's own error
    /// message, never a partial mutation of the caller's state. A real
    /// host actually forks and marshals the message back over a pipe; a
    /// mock just calls `body` in-process.
    fn run_isolated(&self, body: &mut dyn FnMut() -> Result<(), String>) -> io::Result<Result<(), String>>;

    fn chroot(&self, root: &Path) -> io::Result<()>;

    /// Execute one scriptlet, blocking until it exits. `args` become
    /// argv2.. after the conventional interpreter/script-path pair
    /// (spec.md §6 "Scriptlet ABI").
    fn run_scriptlet(&self, interp: &str, script_path: &Path, args: &[String]) -> io::Result<i32>;

    /// Bytes free on the filesystem backing `mount`.
    fn free_space(&self, mount: &Path) -> io::Result<u64>;
}

/// In-process host for tests: `run_isolated` just calls `body` directly,
/// `run_scriptlet` records the call instead of executing anything, and
/// `free_space` returns a configurable constant.
pub struct MockProcessHost {
    pub free_space_bytes: u64,
    pub ran_scriptlets: std::sync::Mutex<Vec<(String, PathBuf, Vec<String>)>>,
    pub chrooted: std::sync::Mutex<Vec<PathBuf>>,
}

impl MockProcessHost {
    pub fn new(free_space_bytes: u64) -> Self {
        MockProcessHost {
            free_space_bytes,
            ran_scriptlets: std::sync::Mutex::new(Vec::new()),
            chrooted: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl ProcessHost for MockProcessHost {
    fn run_isolated(&self, body: &mut dyn FnMut() -> Result<(), String>) -> io::Result<Result<(), String>> {
        Ok(body())
    }

    fn chroot(&self, root: &Path) -> io::Result<()> {
        self.chrooted.lock().unwrap().push(root.to_path_buf());
        Ok(())
    }

    fn run_scriptlet(&self, interp: &str, script_path: &Path, args: &[String]) -> io::Result<i32> {
        self.ran_scriptlets
            .lock()
            .unwrap()
            .push((interp.to_string(), script_path.to_path_buf(), args.to_vec()));
        Ok(0)
    }

    fn free_space(&self, _mount: &Path) -> io::Result<u64> {
        Ok(self.free_space_bytes)
    }
}

/// Production host: a real `fork`, a self-pipe to marshal the child's
/// error message back to the parent, and `waitpid` to collect the exit
/// status. Scriptlets run via `std::process::Command`, matching the
/// argv0=interpreter, argv1=script-path ABI spec.md §6 specifies.
#[cfg(unix)]
pub struct UnixProcessHost;

#[cfg(unix)]
impl ProcessHost for UnixProcessHost {
    fn run_isolated(&self, body: &mut dyn FnMut() -> Result<(), String>) -> io::Result<Result<(), String>> {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{close, fork, pipe, read, write, ForkResult};

        let (read_fd, write_fd) = pipe()?;

        match unsafe { fork() }.map_err(|e| io::Error::from_raw_os_error(e as i32))? {
            ForkResult::Child => {
                let _ = close(read_fd);
                match body() {
                    Ok(()) => {
                        let _ = close(write_fd);
                        std::process::exit(0);
                    }
                    Err(msg) => {
                        let _ = write(&write_fd, msg.as_bytes());
                        let _ = close(write_fd);
                        std::process::exit(1);
                    }
                }
            }
            ForkResult::Parent { child } => {
                let _ = close(write_fd);
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match read(&read_fd, &mut chunk) {
                        Ok(0) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        Err(_) => break,
                    }
                }
                let _ = close(read_fd);

                match waitpid(child, None).map_err(|e| io::Error::from_raw_os_error(e as i32))? {
                    WaitStatus::Exited(_, 0) => Ok(Ok(())),
                    _ => Ok(Err(String::from_utf8_lossy(&buf).into_owned())),
                }
            }
        }
    }

    fn chroot(&self, root: &Path) -> io::Result<()> {
        nix::unistd::chroot(root).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        std::env::set_current_dir("/")
    }

    fn run_scriptlet(&self, interp: &str, script_path: &Path, args: &[String]) -> io::Result<i32> {
        let status = std::process::Command::new(interp)
            .arg(script_path)
            .args(args)
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn free_space(&self, mount: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(mount).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(stat.blocks_available() * stat.fragment_size())
    }
}

/// Write `script` to a fresh temp file named with the `..pyrpm.` prefix
/// spec.md §5 specifies, retrying `O_EXCL` collisions, and return its
/// path so the caller can pass it to `ProcessHost::run_scriptlet`.
fn materialize_scriptlet(script: &str) -> io::Result<tempfile::TempPath> {
    use std::io::Write;
    const TMP_MAX: u32 = 10_000;

    for _ in 0..TMP_MAX {
        let named = tempfile::Builder::new().prefix("..pyrpm.").tempfile()?;
        let (mut file, path) = named.keep().map_err(|e| e.error)?;
        file.write_all(script.as_bytes())?;
        return Ok(tempfile::TempPath::from_path(path));
    }
    Err(io::Error::new(io::ErrorKind::Other, "exhausted TMP_MAX temp file attempts"))
}

pub struct Executor {
    config: Config,
    host: Box<dyn ProcessHost>,
}

impl Executor {
    pub fn new(config: Config, host: Box<dyn ProcessHost>) -> Self {
        Executor { config, host }
    }

    /// Estimate free space as installed/updated package sizes minus erased
    /// package sizes, compared against `statvfs` of `mount` (spec.md §4.7).
    fn check_free_space(&self, db: &Database, steps: &[Step], mount: &Path) -> Result<(), Error> {
        if self.config.ignoresize {
            return Ok(());
        }
        let mut needed: i64 = 0;
        for step in steps {
            let Some(pkg) = db.get(step.package) else { continue };
            let size = pkg.size() as i64;
            match step.operation {
                Operation::Install | Operation::Update => needed += size,
                Operation::Erase => needed -= size,
            }
        }
        let available = self.host.free_space(mount).map_err(|e| {
            ExecuteError::Io { step: 0, total: steps.len(), nevra: String::new(), source: e }
        })?;
        if needed > 0 && needed as u64 > available {
            return Err(ExecuteError::InsufficientSpace {
                mount: mount.to_path_buf(),
                needed: needed as u64,
                available,
            }
            .into());
        }
        Ok(())
    }

    /// Run every step in order, batching `config.batch_size` at a time
    /// across a fork boundary. `db` is the parent's authoritative mirror,
    /// mutated in place only after the corresponding batch's child exits
    /// cleanly.
    pub fn execute(&self, db: &mut Database, steps: &[Step], root: &Path) -> Result<(), Error> {
        self.check_free_space(db, steps, root)?;
        let total = steps.len();
        let batch_size = self.config.batch_size.max(1);

        let mut offset = 0;
        for batch in steps.chunks(batch_size) {
            self.execute_batch(db, batch, offset, total, root)?;
            offset += batch.len();
        }
        Ok(())
    }

    fn execute_batch(
        &self,
        db: &mut Database,
        batch: &[Step],
        offset: usize,
        total: usize,
        root: &Path,
    ) -> Result<(), Error> {
        let engine = TriggerEngine::build(db);
        // The parent holds file handles open across the fork (spec.md §4.7
        // point 1) so the child can extract without re-resolving paths
        // that may have moved under `--justdb`-style external races.
        let _anchors: Vec<_> = batch
            .iter()
            .filter(|s| matches!(s.operation, Operation::Install | Operation::Update))
            .filter_map(|s| db.get(s.package))
            .filter_map(|p| p.open_payload().ok())
            .collect();

        let config = self.config.clone();
        let host = &self.host;
        let steps_owned: Vec<Step> = batch.to_vec();

        let result = host
            .run_isolated(&mut || {
                if !config.buildroot.as_deref().unwrap_or(Path::new("/")).eq(Path::new("/")) {
                    host.chroot(root).map_err(|e| e.to_string())?;
                }
                for (i, step) in steps_owned.iter().enumerate() {
                    run_step(host.as_ref(), db, &engine, step, config.nodigest).map_err(|cause| {
                        format!("step {}/{}: {cause}", offset + i + 1, total)
                    })?;
                }
                Ok(())
            })
            .map_err(|e| ExecuteError::Io { step: offset, total, nevra: String::new(), source: e })?;

        match result {
            Ok(()) => {
                for step in batch {
                    apply_step(db, step);
                }
                Ok(())
            }
            Err(cause) => {
                let nevra = batch
                    .first()
                    .and_then(|s| db.get(s.package))
                    .map(Package::nevra)
                    .unwrap_or_default();
                Err(ExecuteError::ScriptFailed { step: offset, total, nevra, cause }.into())
            }
        }
    }
}

/// Run one step's scriptlets/triggers/filesystem mutation against `db` as
/// it stood before this batch. Returns a plain `String` error since it
/// crosses the `ProcessHost::run_isolated` boundary, which may be a real
/// fork.
fn run_step(
    host: &dyn ProcessHost,
    db: &Database,
    engine: &TriggerEngine,
    step: &Step,
    nodigest: bool,
) -> Result<(), String> {
    let pkg = db.get(step.package).ok_or_else(|| "package vanished from db".to_string())?;

    match step.operation {
        Operation::Install | Operation::Update => {
            // Advisory per spec.md §7: a digest mismatch aborts the step
            // exactly like a failed scriptlet unless `nodigest` is set.
            if !nodigest {
                pkg.verify_digests().map_err(|e| e.to_string())?;
            }

            if let Some((interp, script)) = &pkg.scriptlets.pre {
                run_scriptlet(host, interp, script, &[])?;
            }

            let mut reader = pkg.open_decompressed_payload().map_err(|e| e.to_string())?;
            let dest = Path::new("/");
            extract_package_payload(&mut reader, dest, pkg.files()).map_err(|e| e.to_string())?;

            if let Some((interp, script)) = &pkg.scriptlets.post {
                run_scriptlet(host, interp, script, &[])?;
            }

            for fired in engine.fire_install(db, step.package, &pkg.name, &pkg.evr) {
                let owner = db.get(fired.owner).ok_or("trigger owner vanished")?;
                run_scriptlet(
                    host,
                    &fired.interp,
                    &fired.script,
                    &[fired.args.0.to_string(), fired.args.1.to_string()],
                )?;
                let _ = owner;
            }
            Ok(())
        }
        Operation::Erase => {
            for fired in engine.fire_erase_before(db, step.package, &pkg.name, &pkg.evr) {
                run_scriptlet(host, &fired.interp, &fired.script, &[fired.args.0.to_string(), fired.args.1.to_string()])?;
            }
            if let Some((interp, script)) = &pkg.scriptlets.preun {
                run_scriptlet(host, interp, script, &[])?;
            }

            for file in pkg.files() {
                let _ = std::fs::remove_file(&file.path);
            }

            if let Some((interp, script)) = &pkg.scriptlets.postun {
                run_scriptlet(host, interp, script, &[])?;
            }
            for fired in engine.fire_erase_after(db, step.package, &pkg.name, &pkg.evr) {
                run_scriptlet(host, &fired.interp, &fired.script, &[fired.args.0.to_string(), fired.args.1.to_string()])?;
            }
            Ok(())
        }
    }
}

fn run_scriptlet(host: &dyn ProcessHost, interp: &str, script: &str, args: &[String]) -> Result<(), String> {
    let path = materialize_scriptlet(script).map_err(|e| e.to_string())?;
    let code = host.run_scriptlet(interp, &path, args).map_err(|e| e.to_string())?;
    if code != 0 {
        return Err(format!("{interp} exited {code}"));
    }
    Ok(())
}

/// Mirror a step's effect on the parent's database after its batch's
/// child exited cleanly, without touching the filesystem again.
fn apply_step(db: &mut Database, step: &Step) {
    match step.operation {
        Operation::Install | Operation::Update => {}
        Operation::Erase => {
            db.remove_package(step.package);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Header, RType, Tag, Tags};

    fn pkg(name: &str) -> Package {
        let mut main = Tags::default();
        main.insert(Tag::Name, RType::String(name.to_string()));
        main.insert(Tag::Version, RType::String("1".to_string()));
        main.insert(Tag::Release, RType::String("1".to_string()));
        main.insert(Tag::Arch, RType::String("x86_64".to_string()));
        main.insert(Tag::Size, RType::Int32(1024));
        let header = Header {
            lead: crate::header::HeaderLead::default(),
            signature: Default::default(),
            main,
            main_header_start: 0,
            payload_offset: 0,
        };
        Package::from_header(header, None).unwrap()
    }

    #[test]
    fn erase_step_removes_package_from_db_mirror() {
        let mut db = Database::new();
        let id = db.add_package(pkg("foo"));
        let steps = vec![Step { operation: Operation::Erase, package: id }];

        let host = Box::new(MockProcessHost::new(u64::MAX));
        let executor = Executor::new(Config::default(), host);
        executor.execute(&mut db, &steps, Path::new("/")).unwrap();

        assert!(db.get(id).is_none());
    }

    #[test]
    fn insufficient_space_aborts_before_any_step_runs() {
        let mut db = Database::new();
        let id = db.add_package(pkg("foo"));
        let steps = vec![Step { operation: Operation::Install, package: id }];

        let host = Box::new(MockProcessHost::new(0));
        let executor = Executor::new(Config::default(), host);
        let err = executor.execute(&mut db, &steps, Path::new("/")).unwrap_err();
        assert!(matches!(err, Error::Execute(ExecuteError::InsufficientSpace { .. })));
    }
}
