use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use revdep_core::export::{export_graph, render_dot, GraphRenderer, GraphvizRenderer, RenderError};
use revdep_core::graph::ExportView;
use revdep_core::layout::WorkLayout;
use tempfile::tempdir;

fn view() -> ExportView {
    BTreeMap::from([
        (
            "vendor/lib64/libFoo.so".to_string(),
            vec!["vendor/lib64/libBar.so".to_string(), "vendor/bin/app".to_string()],
        ),
        ("vendor/lib64/libBar.so".to_string(), vec!["vendor/bin/app".to_string()]),
    ])
}

#[test]
fn dot_has_one_statement_per_edge_from_dependency_to_dependent() {
    let dot = render_dot(&view());
    assert_eq!(
        dot,
        "digraph DependencyTree {\n\
         \x20 \"vendor/lib64/libBar.so\" -> \"vendor/bin/app\";\n\
         \x20 \"vendor/lib64/libFoo.so\" -> \"vendor/lib64/libBar.so\";\n\
         \x20 \"vendor/lib64/libFoo.so\" -> \"vendor/bin/app\";\n\
         }\n"
    );
}

#[test]
fn labels_are_escaped() {
    let view = BTreeMap::from([("a\"b".to_string(), vec!["c\\d".to_string()])]);
    assert!(render_dot(&view).contains(r#""a\"b" -> "c\\d";"#));
}

#[test]
fn empty_view_is_an_empty_digraph() {
    assert_eq!(render_dot(&ExportView::new()), "digraph DependencyTree {\n}\n");
}

struct FailingRenderer;

impl GraphRenderer for FailingRenderer {
    fn render(&self, _dot: &Path, _flat: &Path, _image: &Path) -> Result<(), RenderError> {
        Err(RenderError::Spawn {
            tool: "unflatten".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        })
    }
}

struct RecordingRenderer(Mutex<Vec<String>>);

impl GraphRenderer for RecordingRenderer {
    fn render(&self, dot: &Path, flat: &Path, image: &Path) -> Result<(), RenderError> {
        let mut calls = self.0.lock().expect("lock");
        calls.push(fs::read_to_string(dot).expect("dot written before rendering"));
        calls.push(flat.display().to_string());
        calls.push(image.display().to_string());
        Ok(())
    }
}

#[test]
fn renderer_failure_does_not_fail_the_export() {
    let dir = tempdir().expect("tempdir");
    let layout = WorkLayout::new(dir.path());

    export_graph(&view(), &layout, Some(&FailingRenderer)).expect("export");

    assert_eq!(fs::read_to_string(&layout.dot_path).expect("dot"), render_dot(&view()));
    let json: ExportView =
        serde_json::from_str(&fs::read_to_string(&layout.export_json_path).expect("json"))
            .expect("parse json");
    assert_eq!(json, view());
}

#[test]
fn renderer_receives_the_layout_paths() {
    let dir = tempdir().expect("tempdir");
    let layout = WorkLayout::new(dir.path());
    let renderer = RecordingRenderer(Mutex::new(Vec::new()));

    export_graph(&view(), &layout, Some(&renderer)).expect("export");

    let calls = renderer.0.lock().expect("lock");
    assert_eq!(calls[0], render_dot(&view()));
    assert_eq!(calls[1], layout.flat_dot_path.display().to_string());
    assert_eq!(calls[2], layout.image_path.display().to_string());
}

#[test]
fn missing_graphviz_tools_surface_as_render_errors() {
    let dir = tempdir().expect("tempdir");
    let layout = WorkLayout::new(dir.path());
    fs::write(&layout.dot_path, render_dot(&view())).expect("dot");
    let renderer = GraphvizRenderer::new(
        dir.path().join("no-such-unflatten"),
        dir.path().join("no-such-dot"),
        30,
    );

    let err = renderer
        .render(&layout.dot_path, &layout.flat_dot_path, &layout.image_path)
        .expect_err("tools are missing");
    assert!(matches!(err, RenderError::Spawn { .. }));
    assert!(!layout.image_path.exists());
}
