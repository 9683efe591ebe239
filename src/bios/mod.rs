//! ## BIOS Module
//!
//! Decoding of the BIOS parameter block found in sector 0 of FAT and HPFS
//! volumes.  Both walkers use it: FAT for its entire geometry, HPFS only
//! for the drive geometry and the file-system signature that selects the
//! walker in the first place.

pub mod bpb;
pub mod fat;
