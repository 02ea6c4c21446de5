//! Crate-wide error taxonomy.
//!
//! Low-level codec helpers keep returning `std::io::Result` (matching the
//! teacher crate's header/cpio readers); anything that crosses a Package,
//! Resolver, Orderer or Executor boundary is reported as one of these.

use std::path::PathBuf;
use thiserror::Error;

/// Format errors: the bytes on disk do not describe a valid RPM.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("malformed lead: {0}")]
    MalformedLead(String),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

/// Schema errors: the header store is well-formed but a tag violates its
/// declared type, count, or uniqueness.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown tag id {0}")]
    UnknownTag(u32),
    #[error("tag {tag}: expected type {expected:?}, found {found:?}")]
    WrongTagType {
        tag: u32,
        expected: crate::header::Type,
        found: crate::header::Type,
    },
    #[error("tag {tag}: expected count {expected}, found {found}")]
    WrongTagCount {
        tag: u32,
        expected: usize,
        found: usize,
    },
    #[error("tag {0} appears more than once with conflicting values")]
    DuplicateTag(u32),
}

/// Transaction errors: a single install/update/freshen/erase call failed.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("{0}: already installed")]
    AlreadyInstalled(String),
    #[error("{0}: already added to the transaction")]
    AlreadyAdded(String),
    #[error("{0}: a newer or equal package is already present")]
    OldPackage(String),
    #[error("{0}: architecture incompatible with installed package")]
    ArchIncompat(String),
    #[error("{0}: not installed")]
    NotInstalled(String),
    #[error("{0}: update bookkeeping failed")]
    UpdateFailed(String),
    #[error("{0}: obsolete bookkeeping failed")]
    ObsoleteFailed(String),
}

/// Resolve errors: the transaction as a whole does not check out.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unresolved dependencies for {0} package(s)")]
    UnresolvedDependency(usize),
    #[error("conflicts detected for {0} package(s)")]
    Conflict(usize),
    #[error("file conflicts detected for {0} package(s)")]
    FileConflict(usize),
    #[error("cycle could not be broken among {0} package(s)")]
    CycleUnbreakable(usize),
}

/// Execute errors: the transaction executor aborted mid-batch.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("insufficient disk space on {mount}: need {needed} bytes, have {available}")]
    InsufficientSpace {
        mount: PathBuf,
        needed: u64,
        available: u64,
    },
    #[error("scriptlet failed for {nevra} (step {step}/{total}): {cause}")]
    ScriptFailed {
        step: usize,
        total: usize,
        nevra: String,
        cause: String,
    },
    #[error("I/O error for {nevra} (step {step}/{total}): {source}")]
    Io {
        step: usize,
        total: usize,
        nevra: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
