// test of the command line interface on bare sector images
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn scratch_image(dir: &std::path::Path,name: &str,sectors: usize) -> String {
    let path = dir.join(name);
    let mut img = vec![0u8;sectors*512];
    // drop a recognizable pattern into a few sectors
    for (i,b) in img.iter_mut().enumerate() {
        if i/512==5 || i/512==9 {
            *b = (i%251) as u8;
        }
    }
    std::fs::write(&path,&img).expect("could not write image");
    path.to_str().unwrap().to_string()
}

#[test]
fn no_subcommand() {
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.assert().failure().code(2);
}

#[test]
fn help() {
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.arg("--help").assert().success()
        .stdout(predicate::str::contains("FAT and HPFS"));
}

#[test]
fn completions() {
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["completions","-s","bash"]).assert().success()
        .stdout(predicate::str::contains("volkit"));
}

#[test]
fn read_write_round_trip() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = scratch_image(dir.path(),"plain.img",64);
    let sec_path = dir.path().join("sector.bin");
    let out_path = dir.path().join("out.bin");
    let payload: Vec<u8> = (0..512).map(|i| (i*3%256) as u8).collect();
    std::fs::write(&sec_path,&payload).expect("could not write sector file");

    // writing requires the -w switch
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["write","-d",&img,"-i",sec_path.to_str().unwrap(),"-s","7"])
        .assert().failure().code(2);

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["write","-w","-d",&img,"-i",sec_path.to_str().unwrap(),"-s","7"])
        .assert().success();

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["read","-d",&img,"-o",out_path.to_str().unwrap(),"-s","7"])
        .assert().success();
    assert_eq!(std::fs::read(&out_path).expect("no output"),payload);

    // -w on a read-only action is also refused
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["read","-w","-d",&img,"-o",out_path.to_str().unwrap(),"-s","7"])
        .assert().failure().code(2);
}

#[test]
fn write_requires_full_sector() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = scratch_image(dir.path(),"plain.img",16);
    let short_path = dir.path().join("short.bin");
    std::fs::write(&short_path,&[1,2,3]).expect("could not write");
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["write","-w","-d",&img,"-i",short_path.to_str().unwrap(),"-s","1"])
        .assert().failure().code(2);
}

#[test]
fn crc_sidecar_matches_volume() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = scratch_image(dir.path(),"plain.img",64);
    let crc_path = dir.path().join("plain.crc");
    let crc = crc_path.to_str().unwrap();

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["crc","-d",&img,"-o",crc]).assert().success();

    let raw = std::fs::read(&crc_path).expect("no CRC file");
    assert_eq!(&raw[0..4],&u32::to_le_bytes(0xac994df4));
    assert_eq!(&raw[4..8],&u32::to_le_bytes(64));
    assert_eq!(raw.len(),512 + 64*4);

    // a volume always matches its own sidecar
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["diff",&img,crc]).assert().success()
        .stdout(predicate::str::contains("Differing sectors").not());

    // and stops matching after a sector changes
    let sec_path = dir.path().join("sector.bin");
    std::fs::write(&sec_path,&[0xaau8;512]).expect("could not write");
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["write","-w","-d",&img,"-i",sec_path.to_str().unwrap(),"-s","9"])
        .assert().success();
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["diff",&img,crc]).assert().success()
        .stdout(predicate::str::contains("Differing sectors: #9"));
}

#[test]
fn diff_identical_images() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img1 = scratch_image(dir.path(),"one.img",32);
    let img2 = scratch_image(dir.path(),"two.img",32);
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["diff",&img1,&img2]).assert().success()
        .stdout(predicate::str::contains("Differing sectors").not());
}

#[test]
fn crc_refuses_capture_onto_source() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let img = scratch_image(dir.path(),"plain.img",16);
    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["crc","-d",&img,"-o",&img]).assert().failure().code(2);
}
