use std::fs;
use std::io::Cursor;

use assert_cmd::Command;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use mockito::{Matcher, Server};
use predicates::prelude::*;
use serde_json::json;
use tempfile::tempdir;

fn feed() -> Command {
    let mut cmd = Command::cargo_bin("reddit-image-feed").expect("binary built");
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[test]
fn prints_version() {
    feed()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    feed()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reddit Image Feed"))
        .stdout(predicate::str::contains("--subreddit"))
        .stdout(predicate::str::contains("--download"))
        .stdout(predicate::str::contains("--limit"));
}

#[test]
fn rejects_zero_limit() {
    feed()
        .arg("--limit=0")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--limit"));
}

#[test]
fn headless_run_prints_and_downloads() {
    let mut server = Server::new();
    let base = server.url();
    let listing = json!({
        "kind": "Listing",
        "data": {
            "after": "",
            "children": [
                {"kind": "t3", "data": {"title": "clean desk", "url": format!("{base}/i/desk.png")}},
                {"kind": "t3", "data": {"title": "a question", "url": format!("{base}/r/archlinux/comments/1/")}}
            ]
        }
    });
    server
        .mock("GET", "/r/unixporn/.json")
        .match_query(Matcher::UrlEncoded("limit".into(), "2".into()))
        .with_body(listing.to_string())
        .create();
    server
        .mock("GET", "/i/desk.png")
        .with_body(png(800, 200))
        .create();

    let dir = tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    fs::write(&config, format!("reddit:\n  base_url: {base}\n")).unwrap();
    let out = dir.path().join("saved");

    feed()
        .arg(format!("--config={}", config.display()))
        .args(["--subreddit=unixporn", "--limit=2", "--download", "--headless"])
        .arg(format!("--output-dir={}", out.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains("clean desk (400x100, png)"))
        .stdout(predicate::str::contains("a question").not());

    assert!(out.join("clean_desk.png").exists());
}

#[test]
fn unreachable_listing_exits_with_transport_code() {
    let mut server = Server::new();
    server
        .mock("GET", "/r/archlinux/.json")
        .match_query(Matcher::Any)
        .with_status(503)
        .create();

    let dir = tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    fs::write(&config, format!("reddit:\n  base_url: {}\n", server.url())).unwrap();

    feed()
        .arg(format!("--config={}", config.display()))
        .arg("--headless")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("503"));
}
