// test of the FAT walker against a synthetic FAT12 volume
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use volkit::dio::{self,OpenCfg,DIO_DISK,DIO_SNAPSHOT};
use volkit::dio::save::{SaveFile,SaveKind};
use volkit::fs::{self,Volume,ScanCfg,Report};
use volkit::fs::fat::short_name_checksum;

const TOTAL_SECTORS: usize = 1000;
const RESERVED: usize = 1;
const NUM_FATS: usize = 2;
const SECS_PER_FAT: usize = 3;
const ROOT_ENTRIES: usize = 112;
const ROOT_SECTORS: usize = 7;
const DATA_SECTOR: usize = RESERVED + NUM_FATS*SECS_PER_FAT + ROOT_SECTORS;
const CLUSTERS: usize = 2 + (TOTAL_SECTORS - RESERVED - NUM_FATS*SECS_PER_FAT - ROOT_SECTORS);

const GOOD_DATE: u16 = (1996-1980) << 9 | 6 << 5 | 15;
const GOOD_TIME: u16 = 13 << 11 | 5 << 5 | 2;

fn sec(img: &mut Vec<u8>,n: usize) -> &mut [u8] {
    &mut img[n*512..(n+1)*512]
}

fn boot_sector(img: &mut Vec<u8>) {
    let boot = sec(img,0);
    boot[0..3].copy_from_slice(&[0xeb,0x3c,0x90]);
    boot[3..11].copy_from_slice(b"VOLKIT  ");
    boot[11..13].copy_from_slice(&512u16.to_le_bytes());
    boot[13] = 1;                                       // sectors per cluster
    boot[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
    boot[16] = NUM_FATS as u8;
    boot[17..19].copy_from_slice(&(ROOT_ENTRIES as u16).to_le_bytes());
    boot[19..21].copy_from_slice(&(TOTAL_SECTORS as u16).to_le_bytes());
    boot[21] = 0xf8;
    boot[22..24].copy_from_slice(&(SECS_PER_FAT as u16).to_le_bytes());
    boot[24..26].copy_from_slice(&10u16.to_le_bytes()); // sectors per track
    boot[26..28].copy_from_slice(&2u16.to_le_bytes()); // heads
    boot[510] = 0x55;
    boot[511] = 0xaa;
}

/// pack 12-bit FAT entries and store every copy
fn store_fats(img: &mut Vec<u8>,entries: &[u16]) {
    let mut packed = vec![0u8;SECS_PER_FAT*512];
    let mut s = 0;
    let mut i = 0;
    while i < entries.len() {
        let lo = entries[i] as u32 & 0xfff;
        let hi = match i+1 < entries.len() { true => entries[i+1] as u32 & 0xfff, false => 0 };
        let t = lo | hi << 12;
        packed[s] = (t & 0xff) as u8;
        packed[s+1] = ((t >> 8) & 0xff) as u8;
        packed[s+2] = ((t >> 16) & 0xff) as u8;
        s += 3;
        i += 2;
    }
    for f in 0..NUM_FATS {
        let base = (RESERVED + f*SECS_PER_FAT)*512;
        img[base..base+packed.len()].copy_from_slice(&packed);
    }
}

fn dirent(name: &[u8;11],attr: u8,cluster: u16,size: u32) -> [u8;32] {
    let mut e = [0u8;32];
    e[0..11].copy_from_slice(name);
    e[11] = attr;
    e[22..24].copy_from_slice(&GOOD_TIME.to_le_bytes());
    e[24..26].copy_from_slice(&GOOD_DATE.to_le_bytes());
    e[26..28].copy_from_slice(&cluster.to_le_bytes());
    e[28..32].copy_from_slice(&size.to_le_bytes());
    e
}

fn vfat_fragment(index: u8,last: bool,checksum: u8,units: &[u16]) -> [u8;32] {
    let mut e = [0u8;32];
    e[0] = index | match last { true => 0x40, false => 0 };
    e[11] = 0x0f;
    e[13] = checksum;
    let offsets = [1,3,5,7,9,14,16,18,20,22,24,28,30];
    for (i,off) in offsets.iter().enumerate() {
        let unit: u16 = match i {
            i if i < units.len() => units[i],
            i if i==units.len() && last => 0,
            _ => 0xffff
        };
        e[*off..*off+2].copy_from_slice(&unit.to_le_bytes());
    }
    e
}

/// A consistent little volume: a label, a plain file, a file with a VFAT
/// long name, and a subdirectory holding one more file.
fn build_image() -> Vec<u8> {
    let mut img = vec![0u8;TOTAL_SECTORS*512];
    boot_sector(&mut img);
    let mut fat = vec![0u16;CLUSTERS];
    fat[0] = 0xff8;
    fat[1] = 0xfff;
    fat[2] = 3;         // README.TXT: clusters 2,3
    fat[3] = 0xfff;
    fat[4] = 0xfff;     // LONGNA~1.TXT
    fat[5] = 0xfff;     // SUBDIR
    fat[6] = 0xfff;     // SUBDIR/FILE2.BIN
    store_fats(&mut img,&fat);

    let short: [u8;11] = *b"LONGNA~1TXT";
    let cs = short_name_checksum(&short);
    let long: Vec<u16> = "a long name.txt".encode_utf16().collect();
    let mut entries: Vec<[u8;32]> = Vec::new();
    entries.push(dirent(b"TESTDISK   ",0x08,0,0));
    entries.push(dirent(b"README  TXT",0x20,2,600));
    entries.push(vfat_fragment(2,true,cs,&long[13..]));
    entries.push(vfat_fragment(1,false,cs,&long[0..13]));
    entries.push(dirent(&short,0x20,4,100));
    entries.push(dirent(b"SUBDIR     ",0x10,5,0));
    let root_base = (RESERVED + NUM_FATS*SECS_PER_FAT)*512;
    for (i,e) in entries.iter().enumerate() {
        img[root_base+i*32..root_base+(i+1)*32].copy_from_slice(e);
    }

    // subdirectory in cluster 5
    let sub_base = (DATA_SECTOR + 5 - 2)*512;
    let sub = [
        dirent(b".          ",0x10,5,0),
        dirent(b"..         ",0x10,0,0),
        dirent(b"FILE2   BIN",0x20,6,512)
    ];
    for (i,e) in sub.iter().enumerate() {
        img[sub_base+i*32..sub_base+(i+1)*32].copy_from_slice(e);
    }

    // file contents
    for i in 0..1024 {
        img[(DATA_SECTOR)*512 + i] = (i % 253) as u8;       // README.TXT
    }
    for i in 0..512 {
        img[(DATA_SECTOR+2)*512 + i] = 0x42;                // LONGNA~1.TXT
        img[(DATA_SECTOR+4)*512 + i] = (i % 7) as u8;       // FILE2.BIN
    }
    img
}

fn write_image(dir: &std::path::Path,name: &str,img: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path,img).expect("could not write image");
    path.to_str().unwrap().to_string()
}

fn run_check(path: &str) -> (u32,u32) {
    let mut cfg = ScanCfg::new();
    cfg.check = true;
    let mut rpt = Report::new();
    let src = dio::open(path,DIO_DISK | DIO_SNAPSHOT,false,&OpenCfg::new()).expect("open failed");
    let mut vol = Volume::new(src);
    fs::scan_volume(&mut vol,&cfg,&mut rpt,None).expect("walk failed");
    (rpt.count(0),rpt.count(1))
}

#[test]
fn clean_volume_checks_clean() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = write_image(dir.path(),"fat.img",&build_image());
    assert_eq!(run_check(&img),(0,0));

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["check","-d",&img]).assert().success();
}

#[test]
fn fat_copies_cross_compared() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut img = build_image();
    // flip a chain link in the second FAT copy only
    let base = (RESERVED + SECS_PER_FAT)*512;
    img[base + 9] ^= 0x04;
    let path = write_image(dir.path(),"fatdiff.img",&img);
    let (_soft,hard) = run_check(&path);
    assert!(hard >= 1);

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["check","-d",&path]).assert().failure().code(1);
}

#[test]
fn cross_linked_chain_is_flagged() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut img = build_image();
    // point FILE2.BIN at one of README.TXT's clusters
    let sub_base = (DATA_SECTOR + 5 - 2)*512;
    img[sub_base + 2*32 + 26..sub_base + 2*32 + 28].copy_from_slice(&3u16.to_le_bytes());
    let path = write_image(dir.path(),"crosslink.img",&img);
    let (_soft,hard) = run_check(&path);
    assert!(hard >= 1);
}

#[test]
fn find_and_list() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = write_image(dir.path(),"fat.img",&build_image());

    let mut cfg = ScanCfg::new();
    cfg.find = Some("/SUBDIR".to_string());
    cfg.dir = true;
    let mut rpt = Report::new();
    let src = dio::open(&img,DIO_DISK | DIO_SNAPSHOT,false,&OpenCfg::new()).expect("open failed");
    let mut vol = Volume::new(src);
    let err = fs::scan_volume(&mut vol,&cfg,&mut rpt,None).expect_err("should unwind on success");
    assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::Found)));

    let mut cfg = ScanCfg::new();
    cfg.find = Some("/NOSUCH.FIL".to_string());
    let mut rpt = Report::new();
    let src = dio::open(&img,DIO_DISK | DIO_SNAPSHOT,false,&OpenCfg::new()).expect("open failed");
    let mut vol = Volume::new(src);
    let err = fs::scan_volume(&mut vol,&cfg,&mut rpt,None).expect_err("should not be found");
    assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::NotFound(_,_))));
}

#[test]
fn copy_extracts_exact_bytes() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = write_image(dir.path(),"fat.img",&build_image());
    let out = dir.path().join("readme.out");

    let mut cfg = ScanCfg::new();
    cfg.find = Some("/README.TXT".to_string());
    cfg.copy = true;
    let mut rpt = Report::new();
    let src = dio::open(&img,DIO_DISK,false,&OpenCfg::new()).expect("open failed");
    let cap = SaveFile::create(out.to_str().unwrap(),&img,SaveKind::Raw).expect("create failed");
    let mut vol = Volume::with_capture(src,cap);
    let err = fs::scan_volume(&mut vol,&cfg,&mut rpt,None).expect_err("should unwind on success");
    assert!(matches!(err.downcast_ref::<fs::Error>(),Some(fs::Error::Found)));

    let copied = std::fs::read(&out).expect("no copy output");
    let expect: Vec<u8> = (0..600).map(|i| (i % 253) as u8).collect();
    assert_eq!(copied,expect);
}

#[test]
fn info_describes_the_volume() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = write_image(dir.path(),"fat.img",&build_image());
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["info","-d",&img]).assert().success()
        .stdout(predicate::str::contains("Boot sector:")
            .and(predicate::str::contains("Number of free clusters")));

    // where is the file stored
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["info","-d",&img,"-f","/README.TXT"]).assert().success()
        .stdout(predicate::str::contains("Number of clusters: 2"));
}

#[test]
fn restore_round_trip() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = write_image(dir.path(),"fat.img",&build_image());
    let snp_path = dir.path().join("fat.snp");
    let snp = snp_path.to_str().unwrap().to_string();
    let backup_path = dir.path().join("pre.snp");
    let backup = backup_path.to_str().unwrap().to_string();

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["save","-d",&img,"-o",&snp]).assert().success();

    // clobber a FAT sector, which the snapshot holds
    let junk_path = dir.path().join("junk.bin");
    std::fs::write(&junk_path,&[0x5au8;512]).expect("could not write");
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["write","-w","-d",&img,"-i",junk_path.to_str().unwrap(),"-s","1"])
        .assert().success();

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["diff",&snp,&img]).assert().success()
        .stdout(predicate::str::contains("Differing sectors: #1"));

    // put the captured sectors back, saving the junk into a backup
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["restore","-w","--yes","-b",&backup,&img,&snp]).assert().success();

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["diff",&snp,&img]).assert().success()
        .stdout(predicate::str::contains("Differing sectors").not());
    assert_eq!(run_check(&img),(0,0));

    let raw = std::fs::read(&backup_path).expect("no backup");
    assert_eq!(&raw[0..4],&u32::to_le_bytes(0xaf974803));
}

#[test]
fn snapshot_walks_like_the_volume() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = write_image(dir.path(),"fat.img",&build_image());
    let snp = dir.path().join("fat.snp");

    let mut cfg = ScanCfg::new();
    cfg.save = true;
    let mut rpt = Report::new();
    let src = dio::open(&img,DIO_DISK | DIO_SNAPSHOT,false,&OpenCfg::new()).expect("open failed");
    let cap = SaveFile::create(snp.to_str().unwrap(),&img,SaveKind::Snapshot).expect("create failed");
    let mut vol = Volume::with_capture(src,cap);
    fs::scan_volume(&mut vol,&cfg,&mut rpt,None).expect("walk failed");
    vol.take_capture().expect("capture missing").close().expect("close failed");

    // checking the snapshot finds the same (absence of) problems
    assert_eq!(run_check(snp.to_str().unwrap()),(0,0));
}
