//! Transaction-wide configuration.
//!
//! Replaces `pyrpm`'s module-global `rpmconfig` (`pyrpm/config.py`) with a
//! value threaded through `Resolver`, `Orderer` and `Executor`
//! constructors, per the REDESIGN FLAG in spec.md §9.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Install an older package as if it were newer (`update()` no longer
    /// fails with `OLD_PACKAGE`).
    pub oldpackage: bool,
    /// Require exact arch match on update, not just arch-compatible.
    pub exactarch: bool,
    /// Skip dependency checking entirely.
    pub nodeps: bool,
    /// Skip digest verification (advisory only; see spec.md §7).
    pub nodigest: bool,
    /// Skip signature verification.
    pub nosignature: bool,
    /// Skip the orderer; install/erase in the order given.
    pub noorder: bool,
    /// Skip running scriptlets.
    pub noscripts: bool,
    /// Skip running triggers.
    pub notriggers: bool,
    /// Skip conflict checking (also disables obsolete-conflict checking).
    pub noconflictcheck: bool,
    /// Skip file-conflict checking.
    pub nofileconflictcheck: bool,
    /// Write the database only, skip filesystem extraction.
    pub justdb: bool,
    /// Dry run: resolve and order, but never touch the filesystem or db.
    pub test: bool,
    /// Ignore free-space estimation failures.
    pub ignoresize: bool,
    /// Ignore arch compatibility checks entirely.
    pub ignorearch: bool,
    /// Resolver/database operate against the full installed set on every
    /// check instead of only the pending transaction's frontier.
    pub check_installed: bool,
    /// Root to extract payloads under / chroot into.
    pub buildroot: Option<PathBuf>,
    /// Directory the in-memory database is (conceptually) backed by.
    pub dbpath: PathBuf,
    /// Executor batch size (spec.md §4.7; default 100).
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            oldpackage: false,
            exactarch: false,
            nodeps: false,
            nodigest: false,
            nosignature: false,
            noorder: false,
            noscripts: false,
            notriggers: false,
            noconflictcheck: false,
            nofileconflictcheck: false,
            justdb: false,
            test: false,
            ignoresize: false,
            ignorearch: false,
            check_installed: false,
            buildroot: None,
            dbpath: PathBuf::from("/var/lib/rpm-core"),
            batch_size: 100,
        }
    }
}
