//! Command-line tests for the gmlscan binary.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn gmlscan() -> Command {
    let mut cmd = Command::cargo_bin("gmlscan").unwrap();
    for var in ["GML_PARSER", "GML_STRICT", "GML_FETCH_ALL_GEOMETRIES", "GML_SKIP_RESOLVE_ELEMS"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_schema_lists_classes() {
    gmlscan()
        .arg("schema")
        .arg(fixture("roads.gml"))
        .arg("--extents")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Road (2 features)")
                .and(predicate::str::contains("lanes real"))
                .and(predicate::str::contains("alias string [list]"))
                .and(predicate::str::contains("extent (0, 0) - (100, 50)")),
        );
}

#[test]
fn test_schema_save_writes_sidecar() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roads.gml");
    fs::copy(fixture("roads.gml"), &path).unwrap();

    gmlscan()
        .args(["schema", "--save", "--backend", "batch"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved to:"));

    let schema = fs::read_to_string(dir.path().join("roads.gfs")).unwrap();
    assert!(schema.contains("name: Road"));
}

#[test]
fn test_dump_filters_and_limits() {
    gmlscan()
        .args(["dump", "--class", "Road", "--limit", "1"])
        .arg(fixture("roads.gml"))
        .assert()
        .success()
        .stdout(
            predicate::str::contains("fid: R1")
                .and(predicate::str::contains("class: Road"))
                .and(predicate::str::contains("R2").not())
                .and(predicate::str::contains("Rhine").not()),
        );
}

#[test]
fn test_resolve_reports_output() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roads.gml");
    fs::copy(fixture("roads.gml"), &path).unwrap();

    gmlscan()
        .arg("resolve")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolved: 1").and(predicate::str::contains(
            "roads.resolved.gml",
        )));
    assert!(dir.path().join("roads.resolved.gml").exists());
}

#[test]
fn test_invalid_backend_fails() {
    gmlscan()
        .args(["schema", "--backend", "sax"])
        .arg(fixture("roads.gml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: Invalid value 'sax'"));
}

#[test]
fn test_missing_file_fails() {
    gmlscan()
        .args(["dump", "/nonexistent/none.gml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
