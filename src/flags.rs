//! Dependency and file bitfields shared by the header, resolver and
//! orderer modules. Grounded in spec.md §3's Dependency triple and the
//! `RPMSENSE_*`/`RPMFILE_*` constant families `pyrpm/resolver.py` reads off
//! raw header tags (`flags.rs` didn't exist as such in `pyrpm`; the
//! constants were scattered module-level ints, collected here into one
//! bitflags type per tag family).

use bitflags::bitflags;

pub use crate::version::SenseFlags;

bitflags! {
    /// Full sense/phase/trigger bitfield stored in a dependency's flags
    /// tag (`RPMTAG_REQUIREFLAGS` and siblings). The low bits are the
    /// plain version-sense bits from `SenseFlags`; the rest select
    /// scriptlet phase, legacy prereq ordering, trigger sense, and the
    /// handful of "this isn't really a dependency" markers RPM overloads
    /// onto the same tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DependencyFlags: u32 {
        const LESS          = 1 << 1;
        const GREATER       = 1 << 2;
        const EQUAL         = 1 << 3;

        /// Legacy `PreReq` bit: order-only, no version sense implied.
        const PREREQ        = 1 << 6;

        const INTERP        = 1 << 8;
        const SCRIPT_PRE    = 1 << 9;
        const SCRIPT_POST   = 1 << 10;
        const SCRIPT_PREUN  = 1 << 11;
        const SCRIPT_POSTUN = 1 << 12;
        const SCRIPT_VERIFY = 1 << 13;

        const FIND_REQUIRES = 1 << 14;
        const FIND_PROVIDES = 1 << 15;

        const TRIGGERIN     = 1 << 16;
        const TRIGGERUN     = 1 << 17;
        const TRIGGERPOSTUN = 1 << 18;

        const MISSINGOK     = 1 << 19;

        const RPMLIB        = 1 << 24;

        const SCRIPT_PREUN_NOFAIL  = 1 << 25;
        const SCRIPT_POSTUN_NOFAIL = 1 << 26;

        const TRIGGERPREIN  = 1 << 27;

        const CONFIG        = 1 << 28;
    }
}

impl DependencyFlags {
    /// The LESS/GREATER/EQUAL sub-bitfield, as used by `range_overlap`.
    pub fn sense(self) -> SenseFlags {
        SenseFlags::from_bits_truncate(self.bits() & 0b1110)
    }

    pub fn is_prereq(self) -> bool {
        self.contains(DependencyFlags::PREREQ)
    }

    pub fn is_scriptlet_phase(self) -> bool {
        self.intersects(
            DependencyFlags::SCRIPT_PRE
                | DependencyFlags::SCRIPT_POST
                | DependencyFlags::SCRIPT_PREUN
                | DependencyFlags::SCRIPT_POSTUN
                | DependencyFlags::SCRIPT_VERIFY,
        )
    }

    pub fn is_trigger(self) -> bool {
        self.intersects(
            DependencyFlags::TRIGGERIN
                | DependencyFlags::TRIGGERUN
                | DependencyFlags::TRIGGERPOSTUN,
        )
    }

    /// Dependencies that don't describe a real package (rpmlib features,
    /// config markers) and must be filtered out before resolution.
    pub fn is_pseudo(self) -> bool {
        self.intersects(DependencyFlags::RPMLIB | DependencyFlags::CONFIG)
    }

    /// A *legacy* prereq: the old `PreReq:` tag, order-only with no
    /// scriptlet-phase or version-sense bits set alongside it (spec.md
    /// §4.4 "PreReq classification").
    pub fn is_legacy_prereq(self) -> bool {
        const ALL_REQUIRES_MASK: DependencyFlags = DependencyFlags::PREREQ
            .union(DependencyFlags::SCRIPT_PRE)
            .union(DependencyFlags::SCRIPT_POST)
            .union(DependencyFlags::SCRIPT_PREUN)
            .union(DependencyFlags::SCRIPT_POSTUN)
            .union(DependencyFlags::SCRIPT_VERIFY)
            .union(DependencyFlags::RPMLIB)
            .union(DependencyFlags::INTERP);
        (self & ALL_REQUIRES_MASK) == DependencyFlags::PREREQ
    }

    /// An *install-only* prereq: must be satisfied before this package's
    /// own `%pre`/`%post` run, regardless of the legacy `PREREQ` bit.
    pub fn is_install_prereq(self) -> bool {
        self.intersects(DependencyFlags::SCRIPT_PRE | DependencyFlags::SCRIPT_POST | DependencyFlags::RPMLIB)
    }

    /// An *erase-only* prereq: must be satisfied before this package's own
    /// `%preun`/`%postun` run.
    pub fn is_erase_prereq(self) -> bool {
        self.intersects(DependencyFlags::SCRIPT_PREUN | DependencyFlags::SCRIPT_POSTUN)
    }
}

bitflags! {
    /// Per-file flags (`RPMTAG_FILEFLAGS`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u32 {
        const CONFIG      = 1 << 0;
        const DOC         = 1 << 1;
        const DONOTUSE    = 1 << 2;
        const MISSINGOK   = 1 << 3;
        const NOREPLACE   = 1 << 4;
        const SPECFILE    = 1 << 5;
        const GHOST       = 1 << 6;
        const LICENSE     = 1 << 7;
        const README      = 1 << 8;
        const EXCLUDE     = 1 << 9;
    }
}

bitflags! {
    /// Per-file verify flags (`RPMTAG_FILEVERIFYFLAGS`), consulted by
    /// `%verify` but otherwise opaque to the resolver/orderer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VerifyFlags: u32 {
        const MD5      = 1 << 0;
        const SIZE     = 1 << 1;
        const LINKTO   = 1 << 2;
        const USER     = 1 << 3;
        const GROUP    = 1 << 4;
        const MTIME    = 1 << 5;
        const MODE     = 1 << 6;
        const RDEV     = 1 << 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sense_sub_bitfield_extraction() {
        let f = DependencyFlags::GREATER | DependencyFlags::EQUAL | DependencyFlags::SCRIPT_PRE;
        assert_eq!(f.sense(), SenseFlags::GREATER | SenseFlags::EQUAL);
    }

    #[test]
    fn pseudo_dependency_detection() {
        assert!(DependencyFlags::RPMLIB.is_pseudo());
        assert!(!DependencyFlags::EQUAL.is_pseudo());
    }

    #[test]
    fn scriptlet_phase_detection() {
        assert!(DependencyFlags::SCRIPT_POSTUN.is_scriptlet_phase());
        assert!(!DependencyFlags::TRIGGERIN.is_scriptlet_phase());
    }
}
