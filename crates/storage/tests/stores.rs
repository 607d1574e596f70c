//! Record store behavior: replay, upsert, position counters.

use skein_storage::{AgentThoughtRecord, MessageRecord, MessageStatus, Storage};

#[test]
fn upsert_then_reload_keeps_last_version() {
    let dir = tempfile::tempdir().unwrap();

    let mut message = MessageRecord::new("conv-1", "hello");
    {
        let storage = Storage::open(dir.path()).unwrap();
        storage.messages.upsert(&message).unwrap();

        message.answer = "hi there".into();
        message.status = MessageStatus::Normal;
        storage.messages.upsert(&message).unwrap();
    }

    // Reload replays the log: two lines, last one wins.
    let storage = Storage::open(dir.path()).unwrap();
    let loaded = storage.messages.get(&message.id).unwrap();
    assert_eq!(loaded.answer, "hi there");
    assert_eq!(loaded.status, MessageStatus::Normal);
}

#[test]
fn thought_positions_increase_per_message() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path()).unwrap();

    assert_eq!(storage.thoughts.next_position("m1"), 1);

    let first = AgentThoughtRecord::new("m1", storage.thoughts.next_position("m1"));
    storage.thoughts.upsert(&first).unwrap();
    assert_eq!(storage.thoughts.next_position("m1"), 2);

    let second = AgentThoughtRecord::new("m1", storage.thoughts.next_position("m1"));
    storage.thoughts.upsert(&second).unwrap();

    // Another message counts from scratch.
    assert_eq!(storage.thoughts.next_position("m2"), 1);

    // Incremental re-upsert of an existing step does not bump positions.
    let mut updated = first.clone();
    updated.observation = Some(serde_json::json!({"search": "result"}));
    storage.thoughts.upsert(&updated).unwrap();
    assert_eq!(storage.thoughts.next_position("m1"), 3);

    let rows = storage.thoughts.list_for_message("m1");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].position, 1);
    assert!(rows[0].observation.is_some());
}

#[test]
fn variable_pool_overwrites_wholesale() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path()).unwrap();

    assert_eq!(storage.variables.get("conv-1"), serde_json::json!({}));

    storage
        .variables
        .set("conv-1", serde_json::json!({"a": 1, "b": 2}))
        .unwrap();
    storage
        .variables
        .set("conv-1", serde_json::json!({"c": 3}))
        .unwrap();

    // No merging: the second write replaced the pool.
    assert_eq!(storage.variables.get("conv-1"), serde_json::json!({"c": 3}));
}

#[test]
fn corrupt_line_is_skipped_on_replay() {
    let dir = tempfile::tempdir().unwrap();
    let message = MessageRecord::new("conv-1", "hello");
    {
        let storage = Storage::open(dir.path()).unwrap();
        storage.messages.upsert(&message).unwrap();
    }

    // Simulate a torn write at the end of the log.
    let path = dir.path().join("records").join("messages.jsonl");
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("{\"id\": \"truncat");
    std::fs::write(&path, raw).unwrap();

    let storage = Storage::open(dir.path()).unwrap();
    assert!(storage.messages.get(&message.id).is_some());
}
