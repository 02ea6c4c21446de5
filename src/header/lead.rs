//! The 96-byte RPM lead: the fixed-size header every RPM file opens with,
//! preceding the signature and main header blobs — spec.md §4.2/§6.
//!
//! Grounded in the teacher crate's `lead.rs`, fixing a copy-paste bug where
//! `signature_type` was read into the already-consumed `osnum` buffer
//! instead of its own, and adding the writer the teacher never finished.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use std::fmt;
use std::io::{self, Read, Seek, Write};
use strum_macros::Display;

pub const MAGIC: [u8; 4] = [0xED, 0xAB, 0xEE, 0xDB];
const NAME_SIZE: usize = 66;
const RESERVED_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, FromPrimitive, ToPrimitive, Display)]
pub enum PackageType {
    Binary = 0,
    Source = 1,
}

/// The fixed 96-byte prefix of every RPM file (spec.md §6 "RPM file format
/// (bit-exact)"): magic, format-version pair, package type, informational
/// arch number, a zero-padded name, an OS number, and the always-5
/// signature type, followed by 16 reserved bytes.
#[derive(Debug, Clone)]
pub struct HeaderLead {
    pub major: u8,
    pub minor: u8,
    pub rpm_type: PackageType,
    pub archnum: u16,
    pub name: [u8; NAME_SIZE],
    pub osnum: u16,
    pub signature_type: u16,
    pub reserved: [u8; RESERVED_SIZE],
}

impl HeaderLead {
    pub fn read<R: Read + Seek>(fh: &mut R) -> io::Result<Self> {
        let mut magic = [0_u8; 4];
        fh.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not an rpm file (bad lead magic)"));
        }

        let mut head = [0_u8; 2];
        fh.read_exact(&mut head)?;
        let [major, minor] = head;
        if !matches!(major, 3 | 4) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported rpm lead major version {major}"),
            ));
        }

        let mut type_be = [0_u8; 2];
        fh.read_exact(&mut type_be)?;
        let rpm_type = PackageType::from_u16(u16::from_be_bytes(type_be))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown lead package type"))?;

        let mut archnum_be = [0_u8; 2];
        fh.read_exact(&mut archnum_be)?;
        let archnum = u16::from_be_bytes(archnum_be);

        let mut name = [0_u8; NAME_SIZE];
        fh.read_exact(&mut name)?;

        let mut osnum_be = [0_u8; 2];
        fh.read_exact(&mut osnum_be)?;
        let osnum = u16::from_be_bytes(osnum_be);

        let mut signature_type_be = [0_u8; 2];
        fh.read_exact(&mut signature_type_be)?;
        let signature_type = u16::from_be_bytes(signature_type_be);

        let mut reserved = [0_u8; RESERVED_SIZE];
        fh.read_exact(&mut reserved)?;

        Ok(HeaderLead {
            major,
            minor,
            rpm_type,
            archnum,
            name,
            osnum,
            signature_type,
            reserved,
        })
    }

    pub fn write<W: Write>(&self, fh: &mut W) -> io::Result<()> {
        fh.write_all(&MAGIC)?;
        fh.write_all(&[self.major, self.minor])?;
        fh.write_all(&(self.rpm_type.to_u16().unwrap_or_default()).to_be_bytes())?;
        fh.write_all(&self.archnum.to_be_bytes())?;
        fh.write_all(&self.name)?;
        fh.write_all(&self.osnum.to_be_bytes())?;
        fh.write_all(&self.signature_type.to_be_bytes())?;
        fh.write_all(&self.reserved)
    }

    pub fn name_str(&self) -> String {
        parse_name(&self.name)
    }
}

impl fmt::Display for HeaderLead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "major: {}", self.major)?;
        writeln!(f, "minor: {}", self.minor)?;
        writeln!(f, "type: {}", self.rpm_type)?;
        writeln!(f, "archnum: {}", self.archnum)?;
        writeln!(f, "name: {}", self.name_str())?;
        writeln!(f, "osnum: {}", self.osnum)?;
        write!(f, "signature_type: {}", self.signature_type)
    }
}

impl Default for HeaderLead {
    fn default() -> Self {
        HeaderLead {
            major: 3,
            minor: 0,
            rpm_type: PackageType::Binary,
            archnum: 0,
            name: [0; NAME_SIZE],
            osnum: 1,
            signature_type: 5,
            reserved: [0; RESERVED_SIZE],
        }
    }
}

fn parse_name(bytes: &[u8]) -> String {
    let position = bytes.iter().position(|&x| x == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..position]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_through_write_and_read() {
        let mut lead = HeaderLead::default();
        lead.name[..3].copy_from_slice(b"foo");

        let mut buf = Vec::new();
        lead.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 96);

        let mut cursor = Cursor::new(buf);
        let read_back = HeaderLead::read(&mut cursor).unwrap();
        assert_eq!(read_back.name_str(), "foo");
        assert_eq!(read_back.rpm_type, PackageType::Binary);
        assert_eq!(read_back.signature_type, 5);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0_u8; 96];
        let mut cursor = Cursor::new(buf);
        assert!(HeaderLead::read(&mut cursor).is_err());
    }
}
