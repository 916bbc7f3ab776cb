use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::TempDir;
use tracemap::handlers::*;
use tracemap_core::{Graph, GraphStore, NodeGroup};

#[test]
fn test_parse_targets_splits_and_trims() {
    let targets = parse_targets("example.com, 8.8.8.8 ,,one.one.one.one");
    assert_eq!(targets, vec!["example.com", "8.8.8.8", "one.one.one.one"]);
}

#[test]
fn test_parse_targets_blank() {
    assert!(parse_targets(" , ,").is_empty());
}

#[test]
fn test_parse_ports() {
    assert_eq!(parse_ports("22, 443,80").unwrap(), vec![22, 443, 80]);
}

#[test]
fn test_parse_ports_deduplicates() {
    assert_eq!(parse_ports("443,443,22").unwrap(), vec![443, 22]);
}

#[test]
fn test_parse_ports_invalid() {
    let result = parse_ports("22,https");
    assert!(result.is_err());
    assert!(result.unwrap_err().contains("https"));

    assert!(parse_ports("0").is_err());
    assert!(parse_ports("70000").is_err());
}

#[test]
fn test_parse_ports_empty() {
    let result = parse_ports(" , ");
    assert!(result.is_err());
    assert!(result.unwrap_err().contains("No TCP ports"));
}

#[test]
fn test_parse_answer() {
    assert_eq!(parse_answer("y"), Some(true));
    assert_eq!(parse_answer("YES\n"), Some(true));
    assert_eq!(parse_answer(" s "), Some(true));
    assert_eq!(parse_answer("n"), Some(false));
    assert_eq!(parse_answer("No"), Some(false));
    assert_eq!(parse_answer(""), None);
    assert_eq!(parse_answer("maybe"), None);
}

#[test]
fn test_read_confirmation_reprompts_until_answered() {
    let mut input = Cursor::new("what\n\nyes\n");
    assert!(read_confirmation(&mut input, "Continue?"));
}

#[test]
fn test_read_confirmation_declines_on_end_of_input() {
    let mut input = Cursor::new("perhaps\n");
    assert!(!read_confirmation(&mut input, "Continue?"));
}

#[test]
fn test_read_confirmation_decline() {
    let mut input = Cursor::new("n\n");
    assert!(!read_confirmation(&mut input, "Continue?"));
}

#[test]
fn test_always_confirm_accepts() {
    let confirm = always_confirm();
    assert!(confirm("Migrate?"));
}

#[test]
fn test_expand_graph_path_plain() {
    assert_eq!(
        expand_graph_path("maps/home.graph"),
        PathBuf::from("maps/home.graph")
    );
}

#[test]
fn test_expand_graph_path_tilde() {
    let expanded = expand_graph_path("~/network_graph.graph");
    assert!(!expanded.to_string_lossy().starts_with('~'));
    assert!(expanded.ends_with("network_graph.graph"));
}

#[test]
fn test_show_graph_reports_corrupt_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("network_graph.graph");
    fs::write(&path, "{ not json").unwrap();

    assert!(show_graph(&path).is_ok());
    // Showing never rewrites the file
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
}

#[test]
fn test_show_graph_missing_and_legacy_files() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("network_graph.graph");
    assert!(show_graph(&path).is_ok());

    let legacy = serde_json::json!({"file_version": "0.6.9", "nodes": []}).to_string();
    fs::write(&path, &legacy).unwrap();
    assert!(show_graph(&path).is_ok());
    assert_eq!(fs::read_to_string(&path).unwrap(), legacy);
}

#[test]
fn test_show_graph_current_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("network_graph.graph");
    let mut graph = Graph::new();
    graph.ensure_node("10.0.0.1", "gateway", NodeGroup::Hop);
    GraphStore::new(&path).save(&graph).unwrap();

    assert!(show_graph(&path).is_ok());
}

#[test]
fn test_show_graph_unreadable_path_fails() {
    let temp_dir = TempDir::new().unwrap();
    assert!(show_graph(temp_dir.path()).is_err());
}
