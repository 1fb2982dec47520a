use std::fs;

use revdep::canonicalize_or_current;
use revdep::commands::{resolve_work_dir, view_json};
use revdep_core::graph::ExportView;
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current(".").expect("canonicalize").canonicalize().expect("canon");
    let expected = tmp.path().canonicalize().expect("canon tmp");

    std::env::set_current_dir(original).expect("restore cwd");
    assert_eq!(result, expected);
}

#[test]
fn canonicalize_or_current_resolves_existing_paths() {
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");

    let result = canonicalize_or_current(subdir.to_str().expect("utf8")).expect("canonicalize");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));
}

#[test]
fn canonicalize_or_current_anchors_missing_paths_to_cwd() {
    let result = canonicalize_or_current("not-created-yet/work").expect("anchored");
    assert!(result.is_absolute());
    assert!(result.ends_with("not-created-yet/work"));
}

#[test]
fn resolve_work_dir_passes_none_through() {
    assert!(resolve_work_dir(None).expect("none").is_none());
    assert!(resolve_work_dir(Some("somewhere")).expect("some").is_some_and(|p| p.is_absolute()));
}

#[test]
fn view_json_is_an_object_of_dependents() {
    let view = ExportView::from([(
        "vendor/lib64/libFoo.so".to_string(),
        vec!["vendor/lib64/libBar.so".to_string()],
    )]);
    let json: serde_json::Value = serde_json::from_str(&view_json(&view).expect("json")).expect("parse");
    assert_eq!(json["vendor/lib64/libFoo.so"][0], "vendor/lib64/libBar.so");
}
