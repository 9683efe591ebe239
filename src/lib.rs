//! # `volkit` main library
//!
//! This library inspects FAT and HPFS volumes at the structural level.
//! It can describe, verify, snapshot, and compare a volume, and extract
//! files from it, without ever modifying the file system (the narrow
//! sector-overwrite actions are the only write paths, and they are gated
//! behind an explicit switch).
//!
//! ## Architecture
//!
//! Operations are built around three layers:
//! * `dio::BlockSource` presents uniform 512-byte sector access over a
//! live device (or flat sector image), a sparse snapshot file, or a CRC
//! sidecar, and `dio::SaveFile` mirrors sectors into a capture file while
//! a walk is running.
//! * `fs` contains the volume walkers.  A walker borrows a `fs::Volume`
//! (block source + optional capture) and a `fs::ScanCfg` describing which
//! action drives the walk; findings are counted in a `fs::Report` and the
//! walk continues past anything non-fatal.
//! * `commands` maps the CLI verbs onto walker configurations.
//!
//! ## File Systems
//!
//! As of this writing `volkit` understands
//! * FAT12/FAT16, including VFAT long names and the OS/2 `EA DATA. SF`
//! extended-attribute file
//! * HPFS, including code pages, hotfixes, extended attributes and the
//! directory and allocation B-trees
//!
//! Sector size is fixed at 512 bytes throughout.

pub mod crc;
pub mod bios;
pub mod dio;
pub mod fs;
pub mod commands;

use std::fmt::Write;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// Make a printable representation of a possibly non-ASCII on-disk string.
/// If every byte up to `n` (or a terminating zero, when `zero_term` is set)
/// is printable, the result is quoted; otherwise the whole field is dumped
/// as hex.  This is intended for names found in directory structures.
pub fn escaped_string(s: &[u8],zero_term: bool) -> String {
    let mut end = s.len();
    for (i,b) in s.iter().enumerate() {
        if *b < 0x20 || *b == 0xff {
            end = i;
            break;
        }
    }
    if end==s.len() || (zero_term && s[end]==0) {
        let mut result = String::from("\"");
        result += &String::from_utf8_lossy(&s[0..end]);
        result += "\"";
        return result;
    }
    let mut result = String::from("0x");
    write!(&mut result,"{}",hex::encode(s)).expect("unreachable");
    result
}

/// Parse a sector or cluster number, accepting decimal or `0x` hex.
pub fn parse_number(s: &str) -> Result<u32,DYNERR> {
    let ans = match s.strip_prefix("0x") {
        Some(hexpart) => u32::from_str_radix(hexpart,16)?,
        None => u32::from_str_radix(s,10)?
    };
    Ok(ans)
}

#[test]
fn test_escaped_string() {
    assert_eq!(escaped_string(b"README  TXT",false),"\"README  TXT\"");
    assert_eq!(escaped_string(b"AB\x00XY",true),"\"AB\"");
    assert_eq!(escaped_string(&[0x01,0x01],false),"0x0101");
}

#[test]
fn test_parse_number() {
    assert_eq!(parse_number("4096").unwrap(),4096);
    assert_eq!(parse_number("0x1000").unwrap(),4096);
    assert!(parse_number("xyzzy").is_err());
}
