use std::fs;

use assert_cmd::Command;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use predicates::prelude::*;
use tempfile::TempDir;

use httpdisk::cache::Payload;

fn httpdisk(cache: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("httpdisk").unwrap();
    // keep the run hermetic: no stray config file, no inherited env
    cmd.current_dir(cache.path())
        .env_remove("HTTPDISK__DIR")
        .env_remove("HTTPDISK__PROXY")
        .arg("--dir")
        .arg(cache.path());
    cmd
}

#[test]
fn status_reports_a_miss_without_any_network() {
    let cache = TempDir::new().unwrap();
    httpdisk(&cache)
        .args(["--status", "http://nosuchhost.invalid/page?a=1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("status: miss"))
        .stdout(predicate::str::contains(
            "key: \"GET http://nosuchhost.invalid/page?a=1\"",
        ))
        .stdout(predicate::str::contains("digest:"))
        .stdout(predicate::str::contains("path:"));
}

#[test]
fn status_normalizes_bare_hostnames() {
    let cache = TempDir::new().unwrap();
    httpdisk(&cache)
        .args(["--status", "nosuchhost.invalid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("url: \"http://nosuchhost.invalid/\""));
}

#[test]
fn unsupported_schemes_fail_fast() {
    let cache = TempDir::new().unwrap();
    httpdisk(&cache)
        .args(["--status", "ftp://example.com/file"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("only http/https supported"));
}

#[test]
fn malformed_headers_fail_fast() {
    let cache = TempDir::new().unwrap();
    httpdisk(&cache)
        .args(["--status", "-H", "no-colon", "http://example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --header"));
}

#[test]
fn invalid_request_method_fails_fast() {
    let cache = TempDir::new().unwrap();
    httpdisk(&cache)
        .args(["--status", "-X", "TELEPORT", "http://example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --request"));
}

#[test]
fn expires_rejects_garbage_durations() {
    let cache = TempDir::new().unwrap();
    httpdisk(&cache)
        .args(["--status", "--expires", "1fortnight", "http://example.com"])
        .assert()
        .failure();
}

//
// httpdisk-grep
//

fn write_entry(dir: &TempDir, name: &str, body: &str) {
    let payload = Payload {
        status: 200,
        reason: "OK".to_string(),
        headers: vec![(
            "Content-Type".to_string(),
            Bytes::from_static(b"text/plain"),
        )],
        body: Bytes::from(body.to_string()),
        comment: "GET http://test".to_string(),
    };
    let file = fs::File::create(dir.path().join(name)).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    payload.serialize(&mut encoder).unwrap();
    encoder.finish().unwrap();
}

fn grep() -> Command {
    Command::cargo_bin("httpdisk-grep").unwrap()
}

#[test]
fn grep_prints_matches_and_exits_zero() {
    let cache = TempDir::new().unwrap();
    write_entry(&cache, "entry", "one match here\nnothing\n");

    grep()
        .args(["match"])
        .arg(cache.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(":one match here"));
}

#[test]
fn grep_exits_one_when_nothing_matches() {
    let cache = TempDir::new().unwrap();
    write_entry(&cache, "entry", "nothing to see\n");

    grep()
        .args(["absent"])
        .arg(cache.path())
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn grep_counts_matching_lines() {
    let cache = TempDir::new().unwrap();
    write_entry(&cache, "entry", "hit\nmiss\nhit again\n");

    grep()
        .args(["-c", "hit"])
        .arg(cache.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("entry:2"));
}

#[test]
fn grep_skips_non_gzip_files_with_notice() {
    let cache = TempDir::new().unwrap();
    fs::write(cache.path().join("stray"), "not gzip").unwrap();

    grep()
        .args(["anything"])
        .arg(cache.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("not in gzip format, skipping"));
}

#[test]
fn grep_silent_mode_prints_nothing() {
    let cache = TempDir::new().unwrap();
    write_entry(&cache, "entry", "quiet match\n");

    grep()
        .args(["-s", "match"])
        .arg(cache.path())
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn grep_rejects_invalid_patterns() {
    let cache = TempDir::new().unwrap();
    grep()
        .args(["(unclosed"])
        .arg(cache.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid pattern"));
}
