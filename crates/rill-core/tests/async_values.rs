//! Integration tests for promise, generator and invalidation behavior.
//!
//! Time is paused, so timers complete as soon as the runtime is idle.

use std::time::Duration;

use rill_core::{CellError, CellId, CellStatus, Interpreter, Notebook, RuntimeConfig, ValueState};

// =============================================================================
// Test Helpers
// =============================================================================

fn notebook() -> Notebook {
    Notebook::new(RuntimeConfig::default(), Interpreter::default())
}

fn load(notebook: &mut Notebook, source: &str) -> Vec<CellId> {
    let ids = notebook.set_source(source).expect("source should load");
    notebook.drain();
    ids
}

fn outputs(notebook: &Notebook, id: CellId) -> Vec<String> {
    notebook.view(id).expect("cell should exist").outputs
}

// =============================================================================
// Promises
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_promise_dependent_sees_value_exactly_once() {
    let mut nb = notebook();
    let ids = load(&mut nb, "let answer = delay(1000, 42);\n\necho(answer);\n");

    assert_eq!(nb.value("answer"), Some(ValueState::Pending));
    assert_eq!(nb.status(ids[1]), Some(CellStatus::Stale));
    assert_eq!(nb.view(ids[1]).unwrap().waiting_on, vec!["answer"]);
    assert_eq!(nb.run_count(ids[1]), Some(0));

    assert!(nb.run_until_idle(Duration::from_secs(5)).await);
    assert_eq!(nb.run_count(ids[1]), Some(1));
    assert_eq!(outputs(&nb, ids[1]), vec!["42"]);
    assert_eq!(nb.status(ids[0]), Some(CellStatus::Idle));
    assert_eq!(nb.run_count(ids[0]), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_promise_waits_for_its_delay() {
    let mut nb = notebook();
    let ids = load(&mut nb, "let answer = delay(1000, 42);\n\necho(answer);\n");

    assert!(!nb.run_until_idle(Duration::from_millis(500)).await);
    assert_eq!(nb.run_count(ids[1]), Some(0));
    assert!(nb.run_until_idle(Duration::from_millis(1000)).await);
    assert_eq!(outputs(&nb, ids[1]), vec!["42"]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_promise_marks_cell_error() {
    let mut nb = notebook();
    let ids = load(&mut nb, "let data = reject(10, \"offline\");\n");

    assert!(nb.run_until_idle(Duration::from_secs(1)).await);
    assert_eq!(nb.status(ids[0]), Some(CellStatus::Error));
    match nb.error(ids[0]) {
        Some(CellError::Runtime { message }) => assert!(message.contains("offline")),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_promise_dependent_sees_error_value() {
    let mut nb = notebook();
    let ids = load(&mut nb, "let data = reject(10, \"offline\");\n\necho(data);\n");
    assert_eq!(nb.run_count(ids[1]), Some(0));

    assert!(nb.run_until_idle(Duration::from_secs(1)).await);
    assert_eq!(nb.status(ids[0]), Some(CellStatus::Error));
    assert_eq!(nb.status(ids[1]), Some(CellStatus::Idle));
    assert_eq!(nb.error(ids[1]), None);
    assert_eq!(nb.run_count(ids[1]), Some(1));
    let shown = outputs(&nb, ids[1]);
    assert_eq!(shown.len(), 1);
    assert!(shown[0].contains("offline"));
}

#[tokio::test(start_paused = true)]
async fn test_unread_promise_still_settles() {
    let mut nb = notebook();
    let ids = load(&mut nb, "let later = delay(50, \"done\");\n");

    assert!(nb.run_until_idle(Duration::from_secs(1)).await);
    let view = nb.view(ids[0]).unwrap();
    assert_eq!(view.values[0].value.as_deref(), Some("\"done\""));
}

// =============================================================================
// Generators
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_generator_reruns_readers_per_item() {
    let mut nb = notebook();
    let ids = load(&mut nb, "let tick = interval(100, 3);\n\necho(tick);\n");
    assert_eq!(nb.run_count(ids[1]), Some(0));

    assert!(nb.run_until_idle(Duration::from_secs(5)).await);
    assert_eq!(nb.run_count(ids[1]), Some(3));
    assert_eq!(outputs(&nb, ids[1]), vec!["2"]);
    assert_eq!(nb.run_count(ids[0]), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_editing_a_generator_cell_stops_the_old_generator() {
    let mut nb = notebook();
    let ids = load(&mut nb, "let tick = interval(100, 1000);\n\necho(tick);\n");

    assert!(!nb.run_until_idle(Duration::from_millis(350)).await);
    assert!(nb.run_count(ids[1]).unwrap() >= 1);

    load(&mut nb, "let tick = 7;\n\necho(tick);\n");
    assert_eq!(outputs(&nb, ids[1]), vec!["7"]);
    assert!(nb.run_until_idle(Duration::from_secs(1)).await);
    assert!(!nb.has_live_tasks());
    assert_eq!(outputs(&nb, ids[1]), vec!["7"]);
}
