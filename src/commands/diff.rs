//! ## `diff`: block-level comparison
//!
//! Any two of {drive, snapshot, CRC file} can be compared.  Two
//! snapshots compare by their (sorted) sector maps, listing sectors
//! present on only one side as well as differing shared sectors; one
//! snapshot drives the comparison by its own map; otherwise the full
//! shared sector range is compared.  If either side is a CRC file the
//! comparison is by checksum.

use clap::ArgMatches;
use crate::crc::Crc32;
use crate::dio::{BlockSource,SourceKind,DIO_DISK,DIO_SNAPSHOT,DIO_CRC,SECTOR_SIZE};
use crate::DYNERR;
use super::{Globals,open_source,print_list};

fn sorted_map(src: &Box<dyn BlockSource>) -> Option<Vec<u32>> {
    src.snapshot_map().map(|m| {
        let mut v = m.to_vec();
        v.sort_unstable();
        v
    })
}

fn read_pair(d1: &mut Box<dyn BlockSource>,d2: &mut Box<dyn BlockSource>,secno: u32)
    -> Result<bool,DYNERR> {
    let mut raw1 = [0u8;SECTOR_SIZE];
    let mut raw2 = [0u8;SECTOR_SIZE];
    d1.read_sector(secno,&mut raw1)?;
    d2.read_sector(secno,&mut raw2)?;
    Ok(raw1 != raw2)
}

/// Compare two snapshot files by their sector maps.  `which` 0 compares
/// sectors present in both, 1 and 2 list sectors only in that file.
fn diff_sectors(d1: &mut Box<dyn BlockSource>,d2: &mut Box<dyn BlockSource>,
                s1: &[u32],s2: &[u32],which: usize) -> Result<(),DYNERR> {
    let label = match which {
        0 => "Differing sectors:".to_string(),
        w => format!("Sectors only in file {}:",w)
    };
    let mut items: Vec<String> = Vec::new();
    let mut i1 = 0;
    let mut i2 = 0;
    while i1 < s1.len() || i2 < s2.len() {
        let cmp = match (i1 < s1.len(),i2 < s2.len()) {
            (false,_) => std::cmp::Ordering::Greater,
            (_,false) => std::cmp::Ordering::Less,
            _ => s1[i1].cmp(&s2[i2])
        };
        match which {
            0 => {
                if cmp==std::cmp::Ordering::Equal && read_pair(d1,d2,s1[i1])? {
                    items.push(format!("#{}",s1[i1]));
                }
            },
            1 => {
                if cmp==std::cmp::Ordering::Less {
                    items.push(format!("#{}",s1[i1]));
                }
            },
            _ => {
                if cmp==std::cmp::Ordering::Greater {
                    items.push(format!("#{}",s2[i2]));
                }
            }
        }
        if cmp != std::cmp::Ordering::Greater {
            i1 += 1;
        }
        if cmp != std::cmp::Ordering::Less {
            i2 += 1;
        }
    }
    print_list(&label,&items);
    Ok(())
}

/// Compare the sectors listed in `array` (one side is a snapshot).
fn compare_sectors_array(d1: &mut Box<dyn BlockSource>,d2: &mut Box<dyn BlockSource>,
                         array: &[u32]) -> Result<(),DYNERR> {
    let kernel = Crc32::new();
    let n1 = d1.total_sectors();
    let n2 = d2.total_sectors();
    let by_crc = d1.kind()==SourceKind::Crc || d2.kind()==SourceKind::Crc;
    let mut items: Vec<String> = Vec::new();
    let mut idx = 0;
    while idx < array.len() {
        let secno = array[idx];
        if (n1 != 0 && secno >= n1) || (n2 != 0 && secno >= n2) {
            break;
        }
        let differ = match by_crc {
            true => d1.checksum(&kernel,secno)? != d2.checksum(&kernel,secno)?,
            false => read_pair(d1,d2,secno)?
        };
        if differ {
            items.push(format!("#{}",secno));
        }
        idx += 1;
    }
    print_list("Differing sectors:",&items);
    if idx < array.len() {
        let which = match n1 { 0 => 2, _ => 1 };
        let missing: Vec<String> = array[idx..].iter().map(|s| format!("#{}",s)).collect();
        print_list(&format!("Missing sectors in source {}:",which),&missing);
    }
    Ok(())
}

/// Compare all sectors of two bounded sources.
fn compare_sectors_all(d1: &mut Box<dyn BlockSource>,d2: &mut Box<dyn BlockSource>) -> Result<(),DYNERR> {
    let kernel = Crc32::new();
    let n1 = d1.total_sectors();
    let n2 = d2.total_sectors();
    let n = n1.min(n2);
    let by_crc = d1.kind()==SourceKind::Crc || d2.kind()==SourceKind::Crc;
    if d1.kind()==SourceKind::Crc && d2.kind()==SourceKind::Crc {
        d1.preload()?;
        d2.preload()?;
    }
    let mut items: Vec<String> = Vec::new();
    for secno in 0..n {
        let differ = match by_crc {
            true => d1.checksum(&kernel,secno)? != d2.checksum(&kernel,secno)?,
            false => read_pair(d1,d2,secno)?
        };
        if differ {
            items.push(format!("#{}",secno));
        }
    }
    print_list("Differing sectors:",&items);
    if n1 > n2 {
        println!("First disk has more sectors than second disk");
    } else if n1 < n2 {
        println!("Second disk has more sectors than first disk");
    }
    Ok(())
}

pub fn diff(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let first = cmd.get_one::<String>("FIRST").expect("required argument");
    let second = cmd.get_one::<String>("SECOND").expect("required argument");
    let mut d1 = open_source(first,DIO_DISK | DIO_SNAPSHOT | DIO_CRC,false,&globals,false)?;
    let mut d2 = open_source(second,DIO_DISK | DIO_SNAPSHOT | DIO_CRC,false,&globals,false)?;
    let s1 = sorted_map(&d1);
    let s2 = sorted_map(&d2);
    match (s1,s2) {
        (Some(s1),Some(s2)) => {
            for which in 0..3 {
                diff_sectors(&mut d1,&mut d2,&s1,&s2,which)?;
            }
        },
        (Some(s1),None) => compare_sectors_array(&mut d1,&mut d2,&s1)?,
        (None,Some(s2)) => compare_sectors_array(&mut d1,&mut d2,&s2)?,
        (None,None) => compare_sectors_all(&mut d1,&mut d2)?
    }
    Ok(0)
}
