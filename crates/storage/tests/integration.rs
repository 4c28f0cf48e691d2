//! Integration tests for the storage crate.
//!
//! Uses in-memory SQLite for fast, isolated tests.

use geofence_model::{Fence, TransitionMask, TransitionType};
use geofence_storage::{FenceRepository, FenceStore, StorageError};
use std::time::Duration;

fn create_test_store() -> FenceStore {
    FenceStore::open_in_memory().expect("Failed to create in-memory store")
}

fn create_test_fence(id: &str) -> Fence {
    Fence::new(id, 41.5, 2.25, 120.0)
}

// =============================================================================
// Store Initialization Tests
// =============================================================================

mod initialization {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let store = FenceStore::open_in_memory();
        assert!(store.is_ok(), "Should create in-memory store");
        assert!(store.unwrap().is_empty().unwrap());
    }

    #[test]
    fn test_open_file_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("fences.db");

        let store = FenceStore::open(&db_path);
        assert!(store.is_ok(), "Should create file-based store");
        assert!(db_path.exists(), "Database file should exist");
    }

    #[test]
    fn test_reopen_existing_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("fences.db");

        {
            let store = FenceStore::open(&db_path).unwrap();
            store
                .save_all(&[create_test_fence("home"), create_test_fence("work")])
                .unwrap();
        }

        {
            let store = FenceStore::open(&db_path).unwrap();
            let fences = store.load_all().unwrap();
            assert_eq!(fences.len(), 2, "Fences should persist after reopen");
        }
    }

    #[test]
    fn test_invalid_path_fails() {
        let result = FenceStore::open(&PathBuf::from("/nonexistent/path/fences.db"));
        assert!(result.is_err(), "Should fail with invalid path");
    }
}

// =============================================================================
// Fence Repository Tests
// =============================================================================

mod fences {
    use super::*;

    #[test]
    fn test_save_and_get_fence() {
        let store = create_test_store();
        let fence = create_test_fence("home")
            .with_transitions(TransitionMask::ALL)
            .with_expiration(Duration::from_secs(3600))
            .with_loitering_delay(Duration::from_secs(30));

        store.save(&fence).unwrap();

        assert_eq!(store.get("home").unwrap(), fence);
    }

    #[test]
    fn test_get_nonexistent_fence() {
        let store = create_test_store();
        assert!(matches!(store.get("missing"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_save_replaces_same_id() {
        let store = create_test_store();
        store.save(&create_test_fence("home")).unwrap();
        store
            .save(&Fence::new("home", 0.0, 0.0, 500.0))
            .unwrap();

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get("home").unwrap().radius, 500.0);
    }

    #[test]
    fn test_load_all_sorted_by_id() {
        let store = create_test_store();
        for id in ["c", "a", "b"] {
            store.save(&create_test_fence(id)).unwrap();
        }

        let ids: Vec<_> = store.load_all().unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_save_all_replaces_snapshot() {
        let store = create_test_store();
        store
            .save_all(&[create_test_fence("old"), create_test_fence("kept")])
            .unwrap();
        store
            .save_all(&[create_test_fence("kept"), create_test_fence("new")])
            .unwrap();

        let ids: Vec<_> = store.load_all().unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["kept", "new"]);
    }

    #[test]
    fn test_save_all_empty_clears() {
        let store = create_test_store();
        store.save(&create_test_fence("home")).unwrap();
        store.save_all(&[]).unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_delete_fence() {
        let store = create_test_store();
        store.save(&create_test_fence("home")).unwrap();

        store.delete("home").unwrap();
        assert!(matches!(store.get("home"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_delete_nonexistent_fence() {
        let store = create_test_store();
        assert!(matches!(store.delete("missing"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_clear() {
        let store = create_test_store();
        store
            .save_all(&[create_test_fence("a"), create_test_fence("b")])
            .unwrap();

        store.clear().unwrap();
        assert!(store.load_all().unwrap().is_empty());

        // Clearing an empty store is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_dwell_fence_keeps_mask() {
        let store = create_test_store();
        store
            .save(&create_test_fence("cafe").with_transitions(TransitionMask::only(TransitionType::Dwell)))
            .unwrap();

        let loaded = store.get("cafe").unwrap();
        assert!(loaded.transition_mask.contains(TransitionType::Dwell));
        assert!(!loaded.transition_mask.contains(TransitionType::Enter));
        assert!(loaded.loitering_delay.is_some());
    }
}

// =============================================================================
// Concurrency Tests
// =============================================================================

mod concurrency {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_writes() {
        let store = Arc::new(create_test_store());

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for j in 0..10 {
                        store
                            .save(&create_test_fence(&format!("t{i}-f{j}")))
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert_eq!(store.len().unwrap(), 50, "All 50 fences should be saved");
    }
}

// =============================================================================
// Edge Case Tests
// =============================================================================

mod edge_cases {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unicode_id() {
        let store = create_test_store();
        store.save(&create_test_fence("café 🏠")).unwrap();
        assert_eq!(store.get("café 🏠").unwrap().id, "café 🏠");
    }

    #[test]
    fn test_undecodable_row_is_skipped() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("fences.db");

        let store = FenceStore::open(&db_path).unwrap();
        store.save(&create_test_fence("good")).unwrap();

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "INSERT INTO fences (id, fence_json, saved_at) VALUES ('bad', 'not json', 0)",
            [],
        )
        .unwrap();

        let fences = store.load_all().unwrap();
        assert_eq!(fences.len(), 1);
        assert_eq!(fences[0].id, "good");
        assert!(matches!(store.get("bad"), Err(StorageError::SerializationError(_))));
    }
}
