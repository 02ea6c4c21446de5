//! Dependency resolver: turns a batch of install/update/freshen/erase
//! requests into a consistent transaction against a `Database` — spec.md
//! §4.4, grounded in `pyrpm/resolver.py`'s `RpmResolver`.

use crate::config::Config;
use crate::database::{Database, PackageId};
use crate::error::{Error, ResolveError, TransactionError};
use crate::package::{Dependency, FileRecord, Package};
use crate::version::cmp_evr;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// `(pkg, unresolved_dep)` pair yielded by a dependency-check pass.
#[derive(Debug, Clone)]
pub struct UnresolvedDependency {
    pub pkg: PackageId,
    pub dependency: Dependency,
}

/// Two packages whose conflicts/provides overlap.
#[derive(Debug, Clone)]
pub struct ConflictReport {
    pub a: PackageId,
    pub b: PackageId,
    pub dependency: Dependency,
}

/// Two packages that disagree about the metadata of a shared file path.
#[derive(Debug, Clone)]
pub struct FileConflictReport {
    pub a: PackageId,
    pub b: PackageId,
    pub path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    pub unresolved: Vec<UnresolvedDependency>,
    pub conflicts: Vec<ConflictReport>,
    pub file_conflicts: Vec<FileConflictReport>,
}

impl ResolveReport {
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty() && self.conflicts.is_empty() && self.file_conflicts.is_empty()
    }
}

/// Owns the installed-package database plus the pending transaction state
/// described in spec.md §3 ("Transaction state"): `installs`, `erases`,
/// `updates: new -> [old]`, `obsoletes: new -> [old]`, and the two recheck
/// frontiers used to incrementalize dependency re-verification.
pub struct Resolver {
    config: Config,
    db: Database,
    pub installs: Vec<PackageId>,
    pub erases: Vec<PackageId>,
    pub updates: HashMap<PackageId, Vec<PackageId>>,
    pub obsoletes: HashMap<PackageId, Vec<PackageId>>,
    check_installs: Vec<PackageId>,
    check_erases: Vec<PackageId>,
    check_file_requires: bool,
    /// File requires that were already unresolved in the installed database
    /// before this transaction started — seeded up front (unless
    /// `check_installed` is set) so later checks report only *newly*
    /// broken file requires, per spec.md §4.4 point 1.
    installed_unresolved_file_requires: HashSet<String>,
}

impl Resolver {
    pub fn new(config: Config, db: Database) -> Self {
        let installed_unresolved_file_requires = if config.check_installed {
            HashSet::new()
        } else {
            unresolved_file_requires(&db)
        };
        Resolver {
            config,
            db,
            installs: Vec::new(),
            erases: Vec::new(),
            updates: HashMap::new(),
            obsoletes: HashMap::new(),
            check_installs: Vec::new(),
            check_erases: Vec::new(),
            check_file_requires: false,
            installed_unresolved_file_requires,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Reset all transaction state, keeping the underlying database and
    /// config (`RpmResolver.clear` in the original).
    pub fn clear(&mut self) {
        self.installs.clear();
        self.erases.clear();
        self.updates.clear();
        self.obsoletes.clear();
        self.check_installs.clear();
        self.check_erases.clear();
        self.check_file_requires = false;
    }

    fn nevra_present(&self, pkg: &Package) -> Option<PackageId> {
        self.db.find_nevra(&pkg.name, &pkg.evr, &pkg.arch)
    }

    fn mark_install(&mut self, id: PackageId) {
        let has_file_requires = self
            .db
            .get(id)
            .map(|p| p.non_pseudo_requires().any(|d| d.name.starts_with('/')))
            .unwrap_or(false);
        self.check_file_requires |= has_file_requires;
        self.installs.push(id);
        self.check_installs.push(id);
    }

    /// Add `pkg` as a plain install. Errors if a package with the same
    /// NEVRA is already installed or already queued this transaction.
    pub fn install(&mut self, pkg: Package) -> Result<PackageId, Error> {
        if let Some(existing) = self.nevra_present(&pkg) {
            if self.erases.contains(&existing) {
                // Being erased this same transaction: not a conflict.
            } else if self.installs.contains(&existing) {
                return Err(TransactionError::AlreadyAdded(pkg.nevra()).into());
            } else {
                return Err(TransactionError::AlreadyInstalled(pkg.nevra()).into());
            }
        }
        let id = self.db.add_package(pkg);
        self.mark_install(id);
        Ok(id)
    }

    /// Arch-compatibility test used by `update`/`freshen`. `ignorearch`
    /// treats every arch as compatible; `exactarch` narrows compatibility
    /// to an exact string match instead of the usual multilib-aware rule.
    fn arch_compatible(&self, a: &str, b: &str) -> bool {
        if self.config.ignorearch {
            return true;
        }
        if self.config.exactarch {
            return a == b;
        }
        a == b || a == "noarch" || b == "noarch"
    }

    /// Install `pkg`, replacing every lower-EVR same-name package already
    /// installed or queued with an `updates[pkg] -> old` entry (erased in
    /// turn), per spec.md §4.4.
    pub fn update(&mut self, pkg: Package) -> Result<PackageId, Error> {
        let name = pkg.name.clone();
        let arch = pkg.arch.clone();
        let evr = pkg.evr.clone();

        // Packages obsoleted by `pkg`'s `Obsoletes:` entries, matched by
        // provides like any other dependency range, excluding same-name
        // packages (those go through the update-candidate path below
        // instead) — `searchDependency` + the `r["name"] != pkg["name"]`
        // filter in `RpmResolver.update`.
        let mut obsoleted: Vec<PackageId> = Vec::new();
        for dep in &pkg.obsoletes {
            for id in self.db.find_providers(dep) {
                if self.erases.contains(&id) || obsoleted.contains(&id) {
                    continue;
                }
                let p = self.db.get(id).unwrap();
                if p.name != name {
                    obsoleted.push(id);
                }
            }
        }

        let mut candidates: Vec<PackageId> = self
            .db
            .by_name(&name)
            .iter()
            .copied()
            .filter(|&id| !self.erases.contains(&id))
            .filter(|&id| {
                let p = self.db.get(id).unwrap();
                self.arch_compatible(&p.arch, &arch)
            })
            .collect();

        if !self.config.oldpackage {
            for &id in &candidates {
                let p = self.db.get(id).unwrap();
                if cmp_evr(&p.evr, &evr) == std::cmp::Ordering::Greater {
                    return Err(TransactionError::OldPackage(pkg.nevra()).into());
                }
            }
        }
        if self.config.exactarch {
            for &id in &candidates {
                let p = self.db.get(id).unwrap();
                if p.arch != arch {
                    return Err(TransactionError::ArchIncompat(pkg.nevra()).into());
                }
            }
        }

        // Only strictly-older packages are actually replaced.
        candidates.retain(|&id| {
            let p = self.db.get(id).unwrap();
            cmp_evr(&p.evr, &evr) == std::cmp::Ordering::Less
        });

        let new_id = self.install(pkg)?;

        let mut replaced = Vec::new();
        for old in candidates {
            self.inherit(new_id, old);
            replaced.push(old);
            self.erase(old)?;
        }
        self.updates.entry(new_id).or_default().extend(replaced);

        for old in obsoleted {
            if self.erases.contains(&old) {
                continue;
            }
            self.inherit(new_id, old);
            self.erase(old)?;
            self.obsoletes.entry(new_id).or_default().push(old);
        }

        Ok(new_id)
    }

    /// Pull forward bookkeeping `old` had already accumulated this
    /// transaction (it was itself a `new` package that obsoleted/updated
    /// something earlier), so replacing it again doesn't lose that chain —
    /// `_inheritUpdates`/`_inheritObsoletes` in the original.
    fn inherit(&mut self, new_id: PackageId, old_id: PackageId) {
        if let Some(inherited) = self.updates.remove(&old_id) {
            self.updates.entry(new_id).or_default().extend(inherited);
        }
        if let Some(inherited) = self.obsoletes.remove(&old_id) {
            self.obsoletes.entry(new_id).or_default().extend(inherited);
        }
    }

    /// `update(pkg)` only if a same-name, arch-compatible package is
    /// already present or queued; otherwise a no-op reported as
    /// `NotInstalled`.
    pub fn freshen(&mut self, pkg: Package) -> Result<Option<PackageId>, Error> {
        let present = self.db.by_name(&pkg.name).iter().any(|&id| {
            !self.erases.contains(&id) && self.arch_compatible(&self.db.get(id).unwrap().arch, &pkg.arch)
        });
        if !present {
            return Err(TransactionError::NotInstalled(pkg.nevra()).into());
        }
        self.update(pkg).map(Some)
    }

    /// Queue `id` for removal. Forbids double-erase and erasing a package
    /// that isn't in the database.
    pub fn erase(&mut self, id: PackageId) -> Result<(), Error> {
        let pkg = self
            .db
            .get(id)
            .ok_or_else(|| TransactionError::NotInstalled(format!("#{id}")))?;
        if self.erases.contains(&id) {
            return Err(TransactionError::NotInstalled(pkg.nevra()).into());
        }
        let has_file_requires = pkg.non_pseudo_requires().any(|d| d.name.starts_with('/'));
        self.check_file_requires |= has_file_requires;
        self.erases.push(id);
        self.check_erases.push(id);
        Ok(())
    }

    /// Is `dep` satisfied by anything still standing in the database
    /// (i.e. not itself queued for erasure)? File-name requires are
    /// matched against file ownership rather than `Provide:` entries.
    fn is_satisfied(&self, dep: &Dependency) -> bool {
        if dep.name.starts_with('/') {
            self.db
                .find_file_providers(&dep.name)
                .iter()
                .any(|id| !self.erases.contains(id))
                || self.installed_unresolved_file_requires.contains(&dep.name)
        } else {
            self.db.find_providers(dep).iter().any(|id| !self.erases.contains(id))
        }
    }

    /// Walk both recheck frontiers, draining them, and return every pair
    /// found unresolved (spec.md §4.4 point 1). Erase checks re-scan every
    /// surviving package's requires rather than only those an erased
    /// package used to provide — simpler than `pyrpm`'s precise reverse
    /// index, same result.
    fn check_dependencies(&mut self) -> Vec<UnresolvedDependency> {
        let mut unresolved = Vec::new();

        for id in self.check_installs.drain(..).collect::<Vec<_>>() {
            let Some(pkg) = self.db.get(id) else { continue };
            for dep in pkg.non_pseudo_requires() {
                if dep.name.starts_with('/') && !self.check_file_requires {
                    continue;
                }
                if !self.is_satisfied(dep) {
                    unresolved.push(UnresolvedDependency {
                        pkg: id,
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if !self.check_erases.is_empty() {
            self.check_erases.clear();
            for (id, pkg) in self.db.iter() {
                if self.erases.contains(&id) {
                    continue;
                }
                for dep in pkg.non_pseudo_requires() {
                    if !self.is_satisfied(dep) {
                        unresolved.push(UnresolvedDependency {
                            pkg: id,
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        if unresolved.iter().all(|u| !u.dependency.name.starts_with('/')) {
            self.check_file_requires = false;
        }

        unresolved
    }

    /// Two packages of the same NEVR never conflict (spec.md §4.4).
    fn same_nevr(a: &Package, b: &Package) -> bool {
        a.name == b.name && a.evr == b.evr
    }

    fn scope(&self) -> Vec<PackageId> {
        if self.config.check_installed {
            self.db.iter().map(|(id, _)| id).collect()
        } else {
            self.installs.clone()
        }
    }

    fn check_conflicts(&self) -> Vec<ConflictReport> {
        let mut out = Vec::new();
        for &a in &self.scope() {
            let Some(pa) = self.db.get(a) else { continue };
            for dep in &pa.conflicts {
                for &b in self.db.providers(&dep.name) {
                    if b == a || self.erases.contains(&b) {
                        continue;
                    }
                    let pb = self.db.get(b).unwrap();
                    if Self::same_nevr(pa, pb) {
                        continue;
                    }
                    if pb.provides.iter().any(|pd| {
                        pd.name == dep.name
                            && crate::version::range_overlap(dep.flags.sense(), &dep.evr, pd.flags.sense(), &pd.evr)
                    }) {
                        out.push(ConflictReport {
                            a,
                            b,
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// File-conflict rule set from spec.md §4.4: directories and GHOST
    /// files never conflict; a conflict requires differing ownership,
    /// differing regular-file content, or differing symlink target, with
    /// a multilib exception for distinct nonzero file colors.
    fn files_conflict(a: &FileRecord, b: &FileRecord) -> bool {
        use crate::flags::FileFlags;
        let a_ghost = FileFlags::from_bits_truncate(a.flags).contains(FileFlags::GHOST);
        let b_ghost = FileFlags::from_bits_truncate(b.flags).contains(FileFlags::GHOST);
        if a_ghost || b_ghost {
            return false;
        }

        let is_dir = |m: u16| (m as u32) & 0o170000 == 0o040000;
        let is_link = |m: u16| (m as u32) & 0o170000 == 0o120000;
        if is_dir(a.mode) && is_dir(b.mode) {
            return false;
        }

        if a.color != 0 && b.color != 0 && a.color != b.color {
            return false; // multilib exception
        }

        if a.user != b.user || a.group != b.group {
            return true;
        }
        if is_link(a.mode) || is_link(b.mode) {
            return is_link(a.mode) != is_link(b.mode) || a.linkto != b.linkto;
        }
        a.mode != b.mode || a.size != b.size || a.md5 != b.md5
    }

    fn check_file_conflicts(&self) -> Vec<FileConflictReport> {
        let mut out = Vec::new();
        for (path, owners) in self.db.duplicate_files() {
            for i in 0..owners.len() {
                for j in (i + 1)..owners.len() {
                    let (a, b) = (owners[i], owners[j]);
                    if self.erases.contains(&a) || self.erases.contains(&b) {
                        continue;
                    }
                    let pa = self.db.get(a).unwrap();
                    let pb = self.db.get(b).unwrap();
                    if Self::same_nevr(pa, pb) {
                        continue;
                    }
                    let fa = pa.files().iter().find(|f| f.path.to_string_lossy() == path);
                    let fb = pb.files().iter().find(|f| f.path.to_string_lossy() == path);
                    if let (Some(fa), Some(fb)) = (fa, fb) {
                        if Self::files_conflict(fa, fb) {
                            out.push(FileConflictReport {
                                a,
                                b,
                                path: path.to_string(),
                            });
                        }
                    }
                }
            }
        }
        out
    }

    /// Run the fixpoint loop of spec.md §4.4: alternate dependency and
    /// conflict checking until both are clean, then report. This core has
    /// no external solver to add more packages mid-resolve (that's the
    /// YUM-like driver's job — out of scope, spec.md §1), so an unresolved
    /// dependency fails the whole transaction immediately rather than
    /// looping forever.
    pub fn resolve(&mut self) -> Result<ResolveReport, Error> {
        let mut report = ResolveReport::default();

        if !self.config.nodeps {
            loop {
                let unresolved = self.check_dependencies();
                if !unresolved.is_empty() {
                    report.unresolved = unresolved;
                    return Err(ResolveError::UnresolvedDependency(report.unresolved.len()).into());
                }
                if self.check_installs.is_empty() && self.check_erases.is_empty() {
                    break;
                }
            }
        }

        if !self.config.noconflictcheck {
            report.conflicts = self.check_conflicts();
            if !report.conflicts.is_empty() {
                return Err(ResolveError::Conflict(report.conflicts.len()).into());
            }
        }

        if !self.config.nofileconflictcheck {
            report.file_conflicts = self.check_file_conflicts();
            if !report.file_conflicts.is_empty() {
                return Err(ResolveError::FileConflict(report.file_conflicts.len()).into());
            }
        }

        Ok(report)
    }

    pub fn into_database(self) -> Database {
        self.db
    }
}

/// File-requires (names starting with `/`) in `db` that no package in `db`
/// currently provides — the baseline a fresh transaction's checks are
/// diffed against, per spec.md §4.4 point 1.
fn unresolved_file_requires(db: &Database) -> HashSet<String> {
    let mut out = HashSet::new();
    for (_, pkg) in db.iter() {
        for dep in pkg.non_pseudo_requires() {
            if dep.name.starts_with('/') && db.find_file_providers(&dep.name).is_empty() {
                out.insert(dep.name.clone());
            }
        }
    }
    out
}

/// Path-ness check shared with the orderer's `config(` filter; kept free
/// here since `Resolver` has no `Path`-typed dependency names to borrow.
pub fn is_file_dependency(name: &str) -> bool {
    Path::new(name).is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::DependencyFlags;
    use crate::header::{Header, RType, Tag, Tags};
    use crate::version::Evr;

    fn pkg(name: &str, version: &str, requires: &[(&str, DependencyFlags, Evr)], provides: &[&str]) -> Package {
        let mut main = Tags::default();
        main.insert(Tag::Name, RType::String(name.to_string()));
        main.insert(Tag::Version, RType::String(version.to_string()));
        main.insert(Tag::Release, RType::String("1".to_string()));
        main.insert(Tag::Arch, RType::String("x86_64".to_string()));

        let mut req_names = Vec::new();
        let mut req_flags = Vec::new();
        let mut req_versions = Vec::new();
        for (n, f, e) in requires {
            req_names.push(n.to_string());
            req_flags.push(f.bits());
            req_versions.push(e.to_string());
        }

        main.insert(Tag::RequireName, RType::StringArray(req_names));
        main.insert(Tag::RequireFlags, RType::Int32Array(req_flags));
        main.insert(Tag::RequireVersion, RType::StringArray(req_versions));

        let mut provide_names = vec![name.to_string()];
        provide_names.extend(provides.iter().map(|s| s.to_string()));
        let n = provide_names.len();
        main.insert(Tag::ProvideName, RType::StringArray(provide_names));
        main.insert(Tag::Provideflags, RType::Int32Array(vec![DependencyFlags::EQUAL.bits(); n]));
        main.insert(Tag::Provideversion, RType::StringArray(vec![version.to_string(); n]));

        let header = Header {
            lead: crate::header::HeaderLead::default(),
            signature: Default::default(),
            main,
            main_header_start: 0,
            payload_offset: 0,
        };
        Package::from_header(header, None).unwrap()
    }

    fn pkg_obsoleting(name: &str, version: &str, obsoletes: &[&str]) -> Package {
        let mut p = pkg(name, version, &[], &[]);
        let obsoletes = obsoletes
            .iter()
            .map(|n| crate::package::Dependency::new(n.to_string(), DependencyFlags::empty(), Evr::default()))
            .collect();
        p.obsoletes = obsoletes;
        p
    }

    #[test]
    fn install_then_reinstall_same_nevra_fails() {
        let mut r = Resolver::new(Config::default(), Database::new());
        r.install(pkg("a", "1", &[], &[])).unwrap();
        let err = r.install(pkg("a", "1", &[], &[])).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::AlreadyInstalled(_))));
    }

    #[test]
    fn update_replaces_older_same_name() {
        let mut r = Resolver::new(Config::default(), Database::new());
        let old = r.install(pkg("a", "1", &[], &[])).unwrap();
        let new = r.update(pkg("a", "2", &[], &[])).unwrap();
        assert_eq!(r.updates.get(&new), Some(&vec![old]));
        assert!(r.erases.contains(&old));
    }

    #[test]
    fn update_older_version_rejected_without_oldpackage() {
        let mut r = Resolver::new(Config::default(), Database::new());
        r.install(pkg("a", "2", &[], &[])).unwrap();
        let err = r.update(pkg("a", "1", &[], &[])).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::OldPackage(_))));
    }

    #[test]
    fn resolve_reports_unresolved_require() {
        let mut r = Resolver::new(Config::default(), Database::new());
        r.install(pkg("b", "1", &[("missing", DependencyFlags::empty(), Evr::default())], &[]))
            .unwrap();
        let err = r.resolve().unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::UnresolvedDependency(1))));
    }

    #[test]
    fn resolve_succeeds_when_dependency_satisfied() {
        let mut r = Resolver::new(Config::default(), Database::new());
        r.install(pkg("base", "1", &[], &["libbase"])).unwrap();
        r.install(pkg("app", "1", &[("libbase", DependencyFlags::empty(), Evr::default())], &[]))
            .unwrap();
        assert!(r.resolve().unwrap().is_clean());
    }

    #[test]
    fn freshen_without_existing_package_fails() {
        let mut r = Resolver::new(Config::default(), Database::new());
        let err = r.freshen(pkg("a", "1", &[], &[])).unwrap_err();
        assert!(matches!(err, Error::Transaction(TransactionError::NotInstalled(_))));
    }

    #[test]
    fn update_erases_obsoleted_unrelated_package() {
        let mut r = Resolver::new(Config::default(), Database::new());
        let old_same_name = r.install(pkg("a", "1", &[], &[])).unwrap();
        let old_obsoleted = r.install(pkg("b", "1", &[], &[])).unwrap();

        let new = r.update(pkg_obsoleting("a", "2", &["b"])).unwrap();

        assert_eq!(r.updates.get(&new), Some(&vec![old_same_name]));
        assert_eq!(r.obsoletes.get(&new), Some(&vec![old_obsoleted]));
        assert!(r.erases.contains(&old_same_name));
        assert!(r.erases.contains(&old_obsoleted));
    }

    #[test]
    fn update_does_not_obsolete_same_name_package() {
        // `a`'s own update candidate ("a" 1 -> "a" 2) must go through the
        // `updates` bookkeeping even if "a" also obsoletes itself by name,
        // matching `resolver.py`'s `r["name"] != pkg["name"]` filter.
        let mut r = Resolver::new(Config::default(), Database::new());
        let old = r.install(pkg("a", "1", &[], &[])).unwrap();

        let new = r.update(pkg_obsoleting("a", "2", &["a"])).unwrap();

        assert_eq!(r.updates.get(&new), Some(&vec![old]));
        assert!(r.obsoletes.get(&new).is_none());
        assert!(r.erases.contains(&old));
    }
}
