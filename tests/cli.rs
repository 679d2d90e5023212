use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use assert_cmd::prelude::*;

fn run(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::cargo_bin("zipstore").unwrap();
    cmd.current_dir(dir);
    for arg in args {
        cmd.arg(arg);
    }
    cmd.output().expect("failed to execute process")
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("stdout isn't valid utf8")
}

const CSV: &str = "\
50000,Saint Paul,MN,Ramsey,44.9,-93.1
30000,Atlanta,GA,Fulton,33.7,-84.4
70000,Little Rock,AR,Pulaski,34.7,-92.3
";

#[test]
fn convert_then_read_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("zips.csv"), CSV).unwrap();

    let convert = run(dir.path(), &["convert", "zips.csv", "zip.zcd"]);
    assert!(convert.status.success(), "{}", stdout(&convert));

    let read = run(dir.path(), &["read", "zip.zcd"]);
    assert!(read.status.success());
    let out = stdout(&read);
    assert!(out.contains("30000"));
    assert!(out.contains("50000"));
    assert!(out.contains("70000"));
}

#[test]
fn convert_blocked_then_header_reports_sequence_set() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("zips.csv"), CSV).unwrap();

    let convert = run(
        dir.path(),
        &["convert-blocked", "zips.csv", "zip.zcb", "1024", "256"],
    );
    assert!(convert.status.success(), "{}", stdout(&convert));

    let header = run(dir.path(), &["header", "zip.zcb"]);
    assert!(header.status.success());
    let out = stdout(&header);
    assert!(out.contains("kind: sequence-set"));
    assert!(out.contains("record_count: 3"));
}

#[test]
fn verify_matches_self_converted_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("zips.csv"), CSV).unwrap();
    run(dir.path(), &["convert", "zips.csv", "zip.zcd"]);

    let verify = run(dir.path(), &["verify", "zips.csv", "zip.zcd"]);
    assert!(verify.status.success());
    assert!(stdout(&verify).contains("OK"));
}

#[test]
fn verify_reports_differ_and_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("zips.csv"), CSV).unwrap();
    run(dir.path(), &["convert", "zips.csv", "zip.zcd"]);

    let other_csv = "10001,New York,NY,New York,40.7,-74.0\n";
    fs::write(dir.path().join("other.csv"), other_csv).unwrap();

    let verify = run(dir.path(), &["verify", "other.csv", "zip.zcd"]);
    assert_eq!(verify.status.code(), Some(2));
    assert!(stdout(&verify).contains("DIFFER"));
}

#[test]
fn zcd_search_finds_and_reports_missing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("zips.csv"), CSV).unwrap();
    run(dir.path(), &["convert", "zips.csv", "zip.zcd"]);

    let search = run(
        dir.path(),
        &["zcd-search", "zip.zcd", "zip.zcd.idx", "50000", "99999"],
    );
    assert!(search.status.success());
    let out = stdout(&search);
    assert!(out.contains("50000"));
    assert!(out.contains("99999 not found"));
}

#[test]
fn header_rejects_unrecognized_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("garbage.bin"), b"not a zipstore file at all").unwrap();

    let header = run(dir.path(), &["header", "garbage.bin"]);
    assert!(!header.status.success());
    assert_eq!(header.status.code(), Some(1));
}

#[test]
fn interactive_loads_searches_and_adds() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("zips.csv"), CSV).unwrap();
    run(dir.path(), &["convert-blocked", "zips.csv", "zip.zcb"]);

    let search = run(
        dir.path(),
        &["interactive", "-F", "zip.zcb", "-S", "50000"],
    );
    assert!(search.status.success(), "{}", stdout(&search));
    assert!(stdout(&search).contains("Found"));

    let add = run(
        dir.path(),
        &[
            "interactive", "-F", "zip.zcb", "-A", "55101", "Saint Paul", "MN", "Ramsey", "44.95",
            "-93.09",
        ],
    );
    assert!(add.status.success(), "{}", stdout(&add));
    assert!(stdout(&add).contains("Added zip code: 55101"));

    let confirm = run(
        dir.path(),
        &["interactive", "-F", "zip.zcb", "-S", "55101"],
    );
    assert!(stdout(&confirm).contains("Found"));
}
