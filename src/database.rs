//! Installed-package database: an arena of `Package`s plus the reverse
//! indices the resolver and orderer query against — spec.md §3/§4.4.
//!
//! Grounded in `pyrpm/database/memorydb.py`'s in-memory index maps
//! (`(provides|requires|conflicts|obsoletes|triggers|filenames) -> pkgs`);
//! the REDESIGN FLAG in spec.md §9 turns the original's pointer-keyed
//! "hashlist" into integer arena handles (`PackageId`) so the resolver and
//! orderer never hold a live reference across a mutation of the database.

use crate::package::{Dependency, Package};
use crate::version::{range_overlap, Evr};
use std::collections::HashMap;

/// Arena handle into a `Database`. Stable across removals: a removed slot
/// is left `None` rather than shifting later indices.
pub type PackageId = usize;

fn index_insert(index: &mut HashMap<String, Vec<PackageId>>, key: &str, id: PackageId) {
    index.entry(key.to_string()).or_default().push(id);
}

fn index_remove(index: &mut HashMap<String, Vec<PackageId>>, key: &str, id: PackageId) {
    if let Some(v) = index.get_mut(key) {
        v.retain(|&x| x != id);
        if v.is_empty() {
            index.remove(key);
        }
    }
}

/// In-memory installed-package database and its derived indices.
///
/// Invariant: for every `(key, id)` entry in a derived index, `id` is still
/// present in `packages`; `remove_package` restores this by stripping every
/// entry the removed package contributed before dropping it.
#[derive(Default)]
pub struct Database {
    packages: Vec<Option<Package>>,
    by_name: HashMap<String, Vec<PackageId>>,
    by_provide: HashMap<String, Vec<PackageId>>,
    by_require: HashMap<String, Vec<PackageId>>,
    by_conflict: HashMap<String, Vec<PackageId>>,
    by_obsolete: HashMap<String, Vec<PackageId>>,
    by_trigger: HashMap<String, Vec<PackageId>>,
    by_filename: HashMap<String, Vec<PackageId>>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    /// Insert `pkg` into the arena and every derived index, returning its
    /// handle. Duplicate NEVRAs are permitted (multilib) — callers that
    /// must reject them do so before calling this (see `Resolver::install`).
    pub fn add_package(&mut self, pkg: Package) -> PackageId {
        let id = self.packages.len();

        index_insert(&mut self.by_name, &pkg.name, id);
        for d in &pkg.provides {
            index_insert(&mut self.by_provide, &d.name, id);
        }
        for d in &pkg.requires {
            index_insert(&mut self.by_require, &d.name, id);
        }
        for d in &pkg.conflicts {
            index_insert(&mut self.by_conflict, &d.name, id);
        }
        for d in &pkg.obsoletes {
            index_insert(&mut self.by_obsolete, &d.name, id);
        }
        for t in &pkg.triggers {
            index_insert(&mut self.by_trigger, &t.name, id);
        }
        for f in pkg.files() {
            index_insert(&mut self.by_filename, &f.path.to_string_lossy(), id);
        }

        self.packages.push(Some(pkg));
        id
    }

    /// Remove `id`, stripping every index entry it contributed. Returns the
    /// removed package (or `None` if `id` was already vacant/out of range).
    pub fn remove_package(&mut self, id: PackageId) -> Option<Package> {
        let pkg = self.packages.get_mut(id)?.take()?;

        index_remove(&mut self.by_name, &pkg.name, id);
        for d in &pkg.provides {
            index_remove(&mut self.by_provide, &d.name, id);
        }
        for d in &pkg.requires {
            index_remove(&mut self.by_require, &d.name, id);
        }
        for d in &pkg.conflicts {
            index_remove(&mut self.by_conflict, &d.name, id);
        }
        for d in &pkg.obsoletes {
            index_remove(&mut self.by_obsolete, &d.name, id);
        }
        for t in &pkg.triggers {
            index_remove(&mut self.by_trigger, &t.name, id);
        }
        for f in pkg.files() {
            index_remove(&mut self.by_filename, &f.path.to_string_lossy(), id);
        }

        Some(pkg)
    }

    pub fn get(&self, id: PackageId) -> Option<&Package> {
        self.packages.get(id).and_then(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.packages.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (PackageId, &Package)> {
        self.packages
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (i, p)))
    }

    fn lookup<'a>(index: &'a HashMap<String, Vec<PackageId>>, key: &str) -> &'a [PackageId] {
        index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_name(&self, name: &str) -> &[PackageId] {
        Self::lookup(&self.by_name, name)
    }

    pub fn providers(&self, name: &str) -> &[PackageId] {
        Self::lookup(&self.by_provide, name)
    }

    pub fn requirers(&self, name: &str) -> &[PackageId] {
        Self::lookup(&self.by_require, name)
    }

    pub fn conflicters(&self, name: &str) -> &[PackageId] {
        Self::lookup(&self.by_conflict, name)
    }

    pub fn obsoleters(&self, name: &str) -> &[PackageId] {
        Self::lookup(&self.by_obsolete, name)
    }

    pub fn trigger_owners(&self, name: &str) -> &[PackageId] {
        Self::lookup(&self.by_trigger, name)
    }

    pub fn file_owners(&self, path: &str) -> &[PackageId] {
        Self::lookup(&self.by_filename, path)
    }

    /// Filenames owned by more than one package — the candidate set for
    /// file-conflict checking (spec.md §4.4 point 4).
    pub fn duplicate_files(&self) -> impl Iterator<Item = (&str, &[PackageId])> {
        self.by_filename
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(path, ids)| (path.as_str(), ids.as_slice()))
    }

    /// A package already present with this exact `(name, evr, arch)`.
    pub fn find_nevra(&self, name: &str, evr: &Evr, arch: &str) -> Option<PackageId> {
        self.by_name(name).iter().copied().find(|&id| {
            let p = self.get(id).expect("index entry without a live package");
            p.evr == *evr && p.arch == arch
        })
    }

    /// Packages in the database whose `provides` satisfy `dep`'s name and
    /// version range (spec.md §4.1 `range_overlap`).
    pub fn find_providers(&self, dep: &Dependency) -> Vec<PackageId> {
        self.providers(&dep.name)
            .iter()
            .copied()
            .filter(|&id| {
                let p = self.get(id).expect("index entry without a live package");
                p.provides.iter().any(|pd| {
                    pd.name == dep.name
                        && range_overlap(dep.flags.sense(), &dep.evr, pd.flags.sense(), &pd.evr)
                })
            })
            .collect()
    }

    /// Packages owning the file `dep` names (a require whose name is an
    /// absolute path, satisfied by file ownership rather than a Provide).
    pub fn find_file_providers(&self, path: &str) -> &[PackageId] {
        self.file_owners(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Header, RType, Tag, Tags};
    use crate::package::Package;

    /// Build a minimal installable `Package` directly from a tag map,
    /// bypassing the on-disk codec (exercised separately in `header`'s and
    /// `package`'s own tests).
    fn pkg(name: &str, version: &str) -> Package {
        let mut main = Tags::default();
        main.insert(Tag::Name, RType::String(name.to_string()));
        main.insert(Tag::Version, RType::String(version.to_string()));
        main.insert(Tag::Release, RType::String("1".to_string()));
        main.insert(Tag::Arch, RType::String("x86_64".to_string()));
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
    fn add_and_remove_strips_all_indices() {
        let mut db = Database::new();
        let id = db.add_package(pkg("foo", "1.0"));
        assert_eq!(db.by_name("foo"), &[id]);

        db.remove_package(id);
        assert!(db.by_name("foo").is_empty());
        assert!(db.get(id).is_none());
    }

    #[test]
    fn duplicate_nevra_detection() {
        let mut db = Database::new();
        let id = db.add_package(pkg("foo", "1.0"));
        let evr = db.get(id).unwrap().evr.clone();
        assert_eq!(db.find_nevra("foo", &evr, "x86_64"), Some(id));
        assert_eq!(db.find_nevra("foo", &evr, "i686"), None);
    }
}
