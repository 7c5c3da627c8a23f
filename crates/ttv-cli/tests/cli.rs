//! CLI command integration tests.
//! Each test builds a content directory in a temp dir and points TTV_DATA_DIR at it.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

fn ttv_cmd(content: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("ttv").unwrap();
    cmd.env("TTV_DATA_DIR", content.path());
    cmd.env_remove("TTV_CONFIG");
    cmd
}

fn write_json(dir: &Path, rel: &str, value: Value) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

/// Four samples over two epochs. Sample 1 flips from class 1 to class 0 in epoch 2.
fn content_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_json(
        dir.path(),
        "meta.json",
        json!({
            "availableEpochs": [1, 2],
            "texts": ["the", "cat", "sat", "down"],
            "labels": {"names": {"0": "doc", "1": "code"}}
        }),
    );
    let epoch = |shift: f64, probs: Value| {
        json!({
            "projection": [[0.0 + shift, 0.0], [1.0 + shift, 0.0], [0.0 + shift, 1.0], [1.0 + shift, 1.0]],
            "labels": [0, 1, 0, 1],
            "predictionProbabilities": probs,
            "originalNeighbors": [[1], [0], [3], [2]],
            "projectionNeighbors": [[2], [3], [0], [1]]
        })
    };
    write_json(
        dir.path(),
        "epochs/1.json",
        epoch(0.0, json!([[0.9, 0.1], [0.2, 0.8], [0.7, 0.3], [0.4, 0.6]])),
    );
    write_json(
        dir.path(),
        "epochs/2.json",
        epoch(0.5, json!([[0.9, 0.1], [0.8, 0.2], [0.7, 0.3], [0.4, 0.6]])),
    );
    dir
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn epochs_lists_available() {
    let dir = content_dir();
    ttv_cmd(&dir)
        .arg("epochs")
        .assert()
        .success()
        .stdout("1\n2\n");
}

#[test]
fn epochs_scanned_without_meta() {
    let dir = content_dir();
    std::fs::remove_file(dir.path().join("meta.json")).unwrap();
    write_json(dir.path(), "epochs/10.json", json!({"projection": []}));
    ttv_cmd(&dir)
        .arg("epochs")
        .assert()
        .success()
        .stdout("1\n2\n10\n");
}

#[test]
fn inspect_reports_flips() {
    let dir = content_dir();
    ttv_cmd(&dir)
        .args(["inspect", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("samples:       4"))
        .stdout(predicate::str::contains("original 4, projection 4"))
        .stdout(predicate::str::contains("misclassified: 1"))
        .stdout(predicate::str::contains("flipped:       1 (vs epoch 1)"))
        .stdout(predicate::str::contains("background:    no"));
}

#[test]
fn inspect_missing_epoch_fails() {
    let dir = content_dir();
    ttv_cmd(&dir)
        .args(["inspect", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load epoch 9"));
}

#[test]
fn missing_content_dir_fails() {
    let dir = content_dir();
    ttv_cmd(&dir)
        .args(["--content"])
        .arg(dir.path().join("nowhere"))
        .arg("epochs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open content directory"));
}

#[test]
fn frame_with_hover_and_lock() {
    let dir = content_dir();
    let frame = stdout_json(ttv_cmd(&dir).args(["frame", "2", "--hover", "0", "--lock", "3"]));

    assert_eq!(frame["epoch"], 2);
    assert_eq!(frame["points"].as_array().unwrap().len(), 4);

    let highlighted: Vec<u64> = frame["highlighted"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect();
    for id in [0, 1, 3] {
        assert!(highlighted.contains(&id), "{id} missing from {highlighted:?}");
    }

    // Every edge touching the hovered or the locked sample, in both spaces.
    let edges = frame["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 8);
    for edge in edges {
        let touches = [0, 3].iter().any(|id| edge["from"] == *id || edge["to"] == *id);
        assert!(touches, "{edge}");
        assert_eq!(edge["status"], "maintain");
    }
    assert!(!frame["trails"].as_array().unwrap().is_empty());
}

#[test]
fn frame_search_hides_points() {
    let dir = content_dir();
    let frame = stdout_json(ttv_cmd(&dir).args(["frame", "1", "--search", "label:1"]));
    let visible: Vec<u64> = frame["points"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|p| p["visible"] == true)
        .map(|p| p["id"].as_u64().unwrap())
        .collect();
    assert_eq!(visible, vec![1, 3]);
}

#[test]
fn config_in_content_dir_applies() {
    let dir = content_dir();
    std::fs::write(
        dir.path().join("ttv.toml"),
        "[view]\nreveal_original_neighbors = false\n",
    )
    .unwrap();
    let frame = stdout_json(ttv_cmd(&dir).args(["frame", "1", "--hover", "0"]));
    let edges: Vec<(u64, u64)> = frame["edges"]
        .as_array()
        .unwrap()
        .iter()
        .inspect(|e| assert_eq!(e["kind"], "projectionSpace"))
        .map(|e| (e["from"].as_u64().unwrap(), e["to"].as_u64().unwrap()))
        .collect();
    assert_eq!(edges, vec![(0, 2), (2, 0)]);
}

#[test]
fn explicit_config_must_exist() {
    let dir = content_dir();
    ttv_cmd(&dir)
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("epochs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn replay_converges_surfaces() {
    let dir = content_dir();
    let script = dir.path().join("script.jsonl");
    std::fs::write(
        &script,
        concat!(
            "# plot opens epoch 1\n",
            "{\"action\": \"epoch\", \"surface\": 0, \"epoch\": 1}\n",
            "{\"action\": \"hover\", \"surface\": 1, \"id\": 2}\n",
            "{\"action\": \"click\", \"surface\": 2, \"id\": 3}\n",
        ),
    )
    .unwrap();

    let report = stdout_json(ttv_cmd(&dir).arg("replay").arg(&script));
    assert_eq!(report["actions"], 3);
    let surfaces = report["surfaces"].as_array().unwrap();
    assert_eq!(surfaces.len(), 3);
    for s in surfaces {
        assert_eq!(s["epoch"], 1);
        assert_eq!(s["highlight"]["hoveredId"], 2);
        assert_eq!(s["highlight"]["lockedIds"], json!([3]));
        assert_eq!(s["cachedEpochs"], json!([1, 2]));
    }
    assert_eq!(report["backendRequests"], json!([]));
}

#[test]
fn replay_bad_script_fails() {
    let dir = content_dir();
    let script = dir.path().join("bad.jsonl");
    std::fs::write(&script, "{\"action\": \"teleport\", \"surface\": 0}\n").unwrap();
    ttv_cmd(&dir)
        .arg("replay")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("script line 1"));
}
