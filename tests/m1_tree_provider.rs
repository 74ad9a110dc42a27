//! Tests for M1: Tree Provider
//! Covers the shared provider suite plus tree-specific persistence
//!
//! Run individual tests with:
//! cargo test --test m1_tree_provider tc_1_1 -- --nocapture
//! cargo test --test m1_tree_provider -- --nocapture

#[macro_use]
mod compat;

use sekejap_index::{
    create_provider, BackendKind, IndexConfig, IndexQuery, InternalIndexState, SchemaIndexProvider,
    TreeIndexProvider,
};
use tempfile::TempDir;

fn open_tree(config: &IndexConfig) -> Box<dyn SchemaIndexProvider> {
    Box::new(TreeIndexProvider::open(config).unwrap())
}

mod tc_1_1_compat_suite {
    use super::*;

    provider_compat_suite!(open_tree);
}

mod tc_1_2_backend_selection {
    use super::*;

    #[test]
    fn test_create_provider_by_name() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::new(dir.path()).backend(BackendKind::from_str("btree"));
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.descriptor().to_string(), "tree-1.0");
        assert!(dir.path().join("tree").join("index-states.bin").exists());
    }
}

mod tc_1_3_snapshot_files {
    use super::*;

    #[test]
    fn test_partition_snapshots_written_on_close() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::new(dir.path()).max_entries_per_partition(2);
        let provider = open_tree(&config);
        let accessor = compat::populate(
            provider.as_ref(),
            7,
            &[(1, "a".into()), (2, "b".into()), (3, "c".into())],
        );
        for ordinal in ["0", "1"] {
            let path = dir.path().join("tree").join("7").join(ordinal).join("postings.bin");
            assert!(path.exists(), "missing {}", path.display());
        }
        assert_eq!(
            compat::query(accessor.as_ref(), IndexQuery::string_prefix(compat::KEY, "")),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_lost_partition_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::new(dir.path()).max_entries_per_partition(1);
        {
            let provider = open_tree(&config);
            let _ = compat::populate(
                provider.as_ref(),
                1,
                &[(1, "a".into()), (2, "b".into()), (3, "c".into())],
            );
        }
        std::fs::remove_dir_all(dir.path().join("tree").join("1").join("1")).unwrap();

        let provider = open_tree(&config);
        assert_eq!(
            provider.get_initial_state(1, &compat::descriptor()),
            InternalIndexState::Online
        );
        assert!(provider
            .get_online_accessor(1, &compat::descriptor(), &compat::sampling())
            .is_err());
    }
}
