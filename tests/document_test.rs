use graphbridge::document::{query_context, DocumentModel, InMemoryDocument};
use graphbridge::errors::BridgeError;
use graphbridge::types::{NodeInfo, NodeKind, SliderState};

fn patch() -> InMemoryDocument {
    // slider -> circle -> panel
    let doc = InMemoryDocument::new();
    let mut slider = NodeInfo::new("slider", NodeKind::Slider, "Radius");
    slider.slider = Some(SliderState {
        min: 0.0,
        max: 10.0,
        value: 5.0,
    });
    doc.add_node(slider);
    doc.add_node(NodeInfo::new("circle", NodeKind::Component, "Circle"));
    let mut panel = NodeInfo::new("panel", NodeKind::Panel, "Out");
    panel.panel_content = Some(String::new());
    doc.add_node(panel);
    doc.connect("slider", "circle").unwrap();
    doc.connect("circle", "panel").unwrap();
    doc.register_owner("circle-in-r", "circle");
    doc
}

#[test]
fn test_snapshot_derives_edges_per_node() {
    let doc = patch();
    let snap = doc.snapshot();
    assert_eq!(snap["circle"].sources, vec!["slider".to_string()]);
    assert_eq!(snap["circle"].targets, vec!["panel".to_string()]);
    assert!(snap["slider"].sources.is_empty());
}

#[test]
fn test_query_context_expands_by_depth() {
    let doc = patch();
    let result = query_context(&doc, &["slider".to_string()], 1);
    let mut ids: Vec<&str> = result.keys().map(|s| s.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["circle", "slider"]);
}

#[test]
fn test_query_context_marks_targets_selected() {
    let doc = patch();
    let result = query_context(&doc, &["circle".to_string()], 1);
    assert!(result["circle"].is_selected);
    assert!(!result["slider"].is_selected);
}

#[test]
fn test_sub_element_ids_resolve_to_their_owner() {
    let doc = patch();
    let result = query_context(&doc, &["circle-in-r".to_string()], 0);
    let ids: Vec<&str> = result.keys().map(|s| s.as_str()).collect();
    assert_eq!(ids, vec!["circle"]);
    assert!(result["circle"].is_selected);
}

#[test]
fn test_unresolvable_ids_are_silently_dropped() {
    let doc = patch();
    let result = query_context(&doc, &["ghost".to_string(), "panel".to_string()], 0);
    let ids: Vec<&str> = result.keys().map(|s| s.as_str()).collect();
    assert_eq!(ids, vec!["panel"]);
}

#[test]
fn test_selection_flows_into_snapshots() {
    let doc = patch();
    doc.select(&["panel".to_string()]);
    assert_eq!(doc.selected_ids(), vec!["panel".to_string()]);
    assert!(doc.snapshot()["panel"].is_selected);
}

#[test]
fn test_slider_values_clamp_to_range() {
    let doc = patch();
    let state = doc.set_slider_value("slider", 99.0).unwrap();
    assert_eq!(state.value, 10.0);
    let state = doc.set_slider_value("slider", -3.0).unwrap();
    assert_eq!(state.value, 0.0);
}

#[test]
fn test_slider_mutation_rejects_non_sliders() {
    let doc = patch();
    let err = doc.set_slider_value("panel", 1.0).unwrap_err();
    assert!(matches!(err, BridgeError::Handler(_)));
}

#[test]
fn test_missing_nodes_report_not_found() {
    let doc = patch();
    assert!(matches!(
        doc.set_panel_text("ghost", "x").unwrap_err(),
        BridgeError::NotFound(_)
    ));
    assert!(matches!(
        doc.connect("slider", "ghost").unwrap_err(),
        BridgeError::NotFound(_)
    ));
    assert!(doc.find_by_id("ghost").is_none());
}

#[test]
fn test_connect_is_idempotent() {
    let doc = patch();
    doc.connect("slider", "circle").unwrap();
    assert_eq!(doc.snapshot()["circle"].sources, vec!["slider".to_string()]);
}

#[test]
fn test_runtime_messages_accumulate_on_a_node() {
    let doc = patch();
    doc.push_runtime_message("circle", "radius must be positive")
        .unwrap();
    doc.push_runtime_message("circle", "solve skipped").unwrap();
    let node = doc.find_by_id("circle").unwrap();
    assert_eq!(
        node.runtime_messages,
        vec!["radius must be positive", "solve skipped"]
    );
    assert!(matches!(
        doc.push_runtime_message("ghost", "x").unwrap_err(),
        BridgeError::NotFound(_)
    ));
}

#[test]
fn test_panel_text_updates_are_visible_in_snapshots() {
    let doc = patch();
    doc.set_panel_text("panel", "r = 5.0").unwrap();
    assert_eq!(
        doc.snapshot()["panel"].panel_content.as_deref(),
        Some("r = 5.0")
    );
}
