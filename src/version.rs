//! EVR version algebra: segment-wise alphanumeric comparison and
//! dependency-range overlap, per spec.md §4.1.

use bitflags::bitflags;
use std::cmp::Ordering;
use std::fmt;

bitflags! {
    /// The sense bits of a dependency range, e.g. `Requires: foo >= 1.0`.
    /// Layered under the wider `DependencyFlags` bitfield (see `flags`
    /// module) but kept standalone since `range_overlap` only ever needs
    /// the sense bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SenseFlags: u32 {
        const LESS    = 1 << 1;
        const GREATER = 1 << 2;
        const EQUAL   = 1 << 3;
    }
}

/// Split `s` into alternating alphabetic and numeric runs, separated by any
/// run of non-alphanumeric characters (which is dropped entirely).
fn segments(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if !c.is_ascii_alphanumeric() {
            i += 1;
            continue;
        }
        let start = i;
        let numeric = c.is_ascii_digit();
        while i < bytes.len()
            && bytes[i].is_ascii_alphanumeric()
            && bytes[i].is_ascii_digit() == numeric
        {
            i += 1;
        }
        out.push(&s[start..i]);
    }
    out
}

fn is_numeric(seg: &str) -> bool {
    seg.as_bytes().first().is_some_and(|b| b.is_ascii_digit())
}

/// Compare two strings the RPM way: alternating alphanumeric runs, numeric
/// runs compared by value (leading zeros stripped, longer non-zero-stripped
/// run wins ties), alphabetic runs compared lexicographically, a numeric
/// run beats an alphabetic run at the same position, and the exhaustion of
/// one side first loses unless both sides exhaust simultaneously.
pub fn cmp_string(a: &str, b: &str) -> Ordering {
    let sa = segments(a);
    let sb = segments(b);
    let mut ia = sa.iter();
    let mut ib = sb.iter();

    loop {
        match (ia.next(), ib.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let (xn, yn) = (is_numeric(x), is_numeric(y));
                let ord = if xn && yn {
                    let xt = x.trim_start_matches('0');
                    let yt = y.trim_start_matches('0');
                    xt.len().cmp(&yt.len()).then_with(|| xt.cmp(yt))
                } else if xn != yn {
                    // numeric beats alphabetic at the same position
                    if xn {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    }
                } else {
                    x.cmp(y)
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Epoch, version, release triple identifying a package revision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Evr {
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
}

impl Evr {
    pub fn new(epoch: Option<u32>, version: impl Into<String>, release: impl Into<String>) -> Self {
        Evr {
            epoch,
            version: version.into(),
            release: release.into(),
        }
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(e) = self.epoch {
            write!(f, "{}:", e)?;
        }
        write!(f, "{}", self.version)?;
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

/// Compare two EVRs: if either release is empty, release is ignored on
/// *both* sides; epoch defaults to 0 when absent.
pub fn cmp_evr(a: &Evr, b: &Evr) -> Ordering {
    let ea = a.epoch.unwrap_or(0);
    let eb = b.epoch.unwrap_or(0);
    let ord = ea.cmp(&eb);
    if ord != Ordering::Equal {
        return ord;
    }

    let ord = cmp_string(&a.version, &b.version);
    if ord != Ordering::Equal {
        return ord;
    }

    if a.release.is_empty() || b.release.is_empty() {
        return Ordering::Equal;
    }
    cmp_string(&a.release, &b.release)
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(cmp_evr(self, other))
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_evr(self, other)
    }
}

/// One endpoint of a half-line: `sense` is one of LESS/GREATER/EQUAL or a
/// LESS|EQUAL / GREATER|EQUAL composite, `evr` anchors it. An empty `evr`
/// (no sense bits at all) denotes "any version", i.e. the whole line.
fn half_line_overlap(flag1: SenseFlags, evr1: &Evr, flag2: SenseFlags, evr2: &Evr) -> bool {
    // Unversioned dependency: overlaps everything.
    if flag1.is_empty() || flag2.is_empty() {
        return true;
    }

    let cmp = cmp_evr(evr1, evr2);

    // EQUAL ranges only overlap another range if that other range's sense
    // admits evr1 == evr2 via the ordering above.
    let sense_admits = |flag: SenseFlags, ord: Ordering| -> bool {
        match ord {
            Ordering::Less => flag.contains(SenseFlags::LESS),
            Ordering::Greater => flag.contains(SenseFlags::GREATER),
            Ordering::Equal => flag.contains(SenseFlags::EQUAL),
        }
    };

    if flag1.contains(SenseFlags::EQUAL) && !flag1.contains(SenseFlags::LESS | SenseFlags::GREATER)
    {
        // flag1 is a bare "=" : overlaps iff evr1 satisfies flag2's range.
        return sense_admits(flag2, cmp) || (cmp == Ordering::Equal && flag2.contains(SenseFlags::EQUAL));
    }
    if flag2.contains(SenseFlags::EQUAL) && !flag2.contains(SenseFlags::LESS | SenseFlags::GREATER)
    {
        let cmp2 = cmp_evr(evr2, evr1);
        return sense_admits(flag1, cmp2) || (cmp2 == Ordering::Equal && flag1.contains(SenseFlags::EQUAL));
    }

    // Both are open or half-open ranges anchored at evr1/evr2. The two
    // half-lines overlap unless they point away from each other with a gap
    // (or touch without either side being inclusive).
    let dir1_up = flag1.contains(SenseFlags::GREATER);
    let dir2_up = flag2.contains(SenseFlags::GREATER);

    match cmp {
        Ordering::Equal => {
            // Same anchor: overlap unless both exclude the boundary and
            // point away from each other (e.g. `> x` and `< x`).
            if dir1_up != dir2_up {
                flag1.contains(SenseFlags::EQUAL) || flag2.contains(SenseFlags::EQUAL)
            } else {
                true
            }
        }
        Ordering::Less => {
            // evr1 < evr2: ranges overlap iff flag1 points up (towards
            // evr2) or flag2 points down (towards evr1).
            dir1_up || !dir2_up
        }
        Ordering::Greater => {
            // evr1 > evr2: symmetric case.
            !dir1_up || dir2_up
        }
    }
}

/// Do the two dependency ranges `(flag1, evr1)` and `(flag2, evr2)` overlap?
/// Per spec.md §4.1: interpret each flag as <, ≤, =, ≥, > and test whether
/// the intersection of the half-lines they denote is non-empty.
pub fn range_overlap(flag1: SenseFlags, evr1: &Evr, flag2: SenseFlags, evr2: &Evr) -> bool {
    half_line_overlap(flag1, evr1, flag2, evr2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_compare_boundary_cases() {
        assert_eq!(cmp_string("1.01", "1.1"), Ordering::Equal);
        assert!(cmp_string("1.0a", "1.0b") == Ordering::Less);
        assert!(cmp_string("2", "10") == Ordering::Less);
    }

    #[test]
    fn string_compare_numeric_beats_alpha() {
        assert_eq!(cmp_string("1.0", "1.a"), Ordering::Greater);
    }

    #[test]
    fn string_compare_exhaustion() {
        assert_eq!(cmp_string("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(cmp_string("1.0.1", "1.0"), Ordering::Greater);
    }

    #[test]
    fn evr_epoch_boundary() {
        let a = Evr::new(None, "1", "1");
        let b = Evr::new(Some(0), "1", "1");
        assert_eq!(cmp_evr(&a, &b), Ordering::Equal);
    }

    #[test]
    fn evr_missing_release_ignored_both_sides() {
        let a = Evr::new(Some(0), "1.0", "1");
        let b = Evr::new(None, "1.0", "");
        assert_eq!(cmp_evr(&a, &b), Ordering::Equal);
    }

    #[test]
    fn evr_epoch_dominates_version() {
        let a = Evr::new(Some(1), "1.0", "1");
        let b = Evr::new(Some(0), "2.0", "1");
        assert_eq!(cmp_evr(&a, &b), Ordering::Greater);
    }

    #[test]
    fn evr_antisymmetric_and_reflexive() {
        let a = Evr::new(Some(0), "1.2", "3");
        let b = Evr::new(Some(0), "1.3", "1");
        assert_eq!(cmp_evr(&a, &b), cmp_evr(&b, &a).reverse());
        assert_eq!(cmp_evr(&a, &a), Ordering::Equal);
    }

    #[test]
    fn range_overlap_equal_ranges_require_equal_evr() {
        let v1 = Evr::new(Some(0), "1.0", "1");
        let v2 = Evr::new(Some(0), "2.0", "1");
        assert!(!range_overlap(
            SenseFlags::EQUAL,
            &v1,
            SenseFlags::EQUAL,
            &v2
        ));
        assert!(range_overlap(
            SenseFlags::EQUAL,
            &v1,
            SenseFlags::EQUAL,
            &v1
        ));
    }

    #[test]
    fn range_overlap_disjoint_open_ranges() {
        let lo = Evr::new(Some(0), "1.0", "1");
        let hi = Evr::new(Some(0), "2.0", "1");
        // >= 2.0  and  < 1.0  : disjoint
        assert!(!range_overlap(
            SenseFlags::GREATER | SenseFlags::EQUAL,
            &hi,
            SenseFlags::LESS,
            &lo
        ));
        // >= 1.0 and < 2.0 : overlap
        assert!(range_overlap(
            SenseFlags::GREATER | SenseFlags::EQUAL,
            &lo,
            SenseFlags::LESS,
            &hi
        ));
    }

    #[test]
    fn range_overlap_unversioned_always_overlaps() {
        let v = Evr::new(Some(0), "1.0", "1");
        assert!(range_overlap(
            SenseFlags::empty(),
            &v,
            SenseFlags::EQUAL,
            &v
        ));
    }
}
