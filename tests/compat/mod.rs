//! Behaviour every schema index provider must share.
//!
//! Each backend's test file opens its provider and instantiates the suite:
//!
//! ```ignore
//! #[macro_use]
//! mod compat;
//! provider_compat_suite!(open_provider);
//! ```

#![allow(dead_code)]

use sekejap_index::{
    EntityId, IndexAccessor, IndexConfig, IndexDescriptor, IndexEntryUpdate, IndexPopulator,
    IndexQuery, IndexSamplingConfig, InternalIndexState, PropertyAccessor, SchemaIndexProvider,
    Value,
};
use std::fs;
use std::ops::Bound;
use std::sync::Arc;
use tempfile::TempDir;

pub type OpenProvider = fn(&IndexConfig) -> Box<dyn SchemaIndexProvider>;

pub const LABEL: u32 = 1;
pub const KEY: u32 = 100;

pub fn descriptor() -> IndexDescriptor {
    IndexDescriptor::for_label(LABEL, &[KEY])
}

pub fn sampling() -> IndexSamplingConfig {
    IndexSamplingConfig::default()
}

pub fn setup(open: OpenProvider) -> (Box<dyn SchemaIndexProvider>, IndexConfig, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::new(dir.path()).writer_heap_bytes(15_000_000);
    (open(&config), config, dir)
}

pub fn adds(entries: &[(EntityId, Value)]) -> Vec<IndexEntryUpdate> {
    let schema = descriptor().schema().clone();
    entries
        .iter()
        .map(|(id, v)| IndexEntryUpdate::add(*id, &schema, v.clone()))
        .collect()
}

/// Populate index `id` with `entries` and return its online accessor.
pub fn populate(
    provider: &dyn SchemaIndexProvider,
    id: u64,
    entries: &[(EntityId, Value)],
) -> Box<dyn IndexAccessor> {
    let mut populator = provider.get_populator(id, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    populator.add(&adds(entries)).unwrap();
    populator.close(true).unwrap();
    assert_eq!(provider.get_initial_state(id, &descriptor()), InternalIndexState::Online);
    provider.get_online_accessor(id, &descriptor(), &sampling()).unwrap()
}

pub fn query(accessor: &dyn IndexAccessor, q: IndexQuery) -> Vec<EntityId> {
    let reader = accessor.new_reader().unwrap();
    let ids = reader.query(&q).unwrap().collect();
    reader.close().unwrap();
    ids
}

fn no_lookup() -> Arc<dyn PropertyAccessor> {
    Arc::new(|_: EntityId, _: u32| None::<Value>)
}

pub fn duplicates_are_returned(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(
        provider.as_ref(),
        1,
        &[(1, "a".into()), (2, "a".into()), (3, "b".into())],
    );
    assert_eq!(query(accessor.as_ref(), IndexQuery::exact(KEY, "a")), vec![1, 2]);
    assert_eq!(query(accessor.as_ref(), IndexQuery::exists(KEY)), vec![1, 2, 3]);
}

pub fn updater_absorbs_conflicts(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(provider.as_ref(), 1, &[(1, "a".into())]);
    let schema = descriptor().schema().clone();

    let mut updater = accessor.new_updater().unwrap();
    updater.process(IndexEntryUpdate::remove(9, &schema, "missing")).unwrap();
    updater.process(IndexEntryUpdate::add(1, &schema, "a")).unwrap();
    updater.process(IndexEntryUpdate::add(2, &schema, "b")).unwrap();
    updater.close().unwrap();

    assert!(accessor.conflicts() >= 2);
    assert_eq!(query(accessor.as_ref(), IndexQuery::exists(KEY)), vec![1, 2]);
}

pub fn updater_changes_are_visible(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(provider.as_ref(), 1, &[(1, "a".into()), (2, "b".into())]);
    let schema = descriptor().schema().clone();

    let mut updater = accessor.new_updater().unwrap();
    updater.process(IndexEntryUpdate::change(1, &schema, "a", "c")).unwrap();
    updater.process(IndexEntryUpdate::remove(2, &schema, "b")).unwrap();
    updater.close().unwrap();

    assert!(query(accessor.as_ref(), IndexQuery::exact(KEY, "a")).is_empty());
    assert_eq!(query(accessor.as_ref(), IndexQuery::exact(KEY, "c")), vec![1]);
    assert_eq!(query(accessor.as_ref(), IndexQuery::exists(KEY)), vec![1]);
}

pub fn updater_schema_mismatch_is_rejected(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(provider.as_ref(), 1, &[]);
    let other = IndexDescriptor::for_label(LABEL + 1, &[KEY]);
    let mut updater = accessor.new_updater().unwrap();
    assert!(updater.process(IndexEntryUpdate::add(1, other.schema(), "a")).is_err());
    updater.close().unwrap();
}

pub fn numeric_range(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(
        provider.as_ref(),
        1,
        &[(1, (-5).into()), (2, (-5).into()), (3, 0.into()), (4, 5.into()), (5, 5.into())],
    );
    let a = accessor.as_ref();
    assert_eq!(query(a, IndexQuery::range(KEY, -5, true, 5, false)), vec![1, 2, 3]);
    assert_eq!(query(a, IndexQuery::range(KEY, -5, false, 5, true)), vec![3, 4, 5]);
    assert_eq!(query(a, IndexQuery::range(KEY, -5, true, 5, true)), vec![1, 2, 3, 4, 5]);
    assert_eq!(
        query(a, IndexQuery::range_bounds(KEY, Bound::Unbounded, Bound::Included(0.into()))),
        vec![1, 2, 3]
    );
    assert!(query(a, IndexQuery::range(KEY, -3, true, -1, true)).is_empty());
    assert_eq!(query(a, IndexQuery::range(KEY, -4.5, true, 4.5, true)), vec![3]);
}

pub fn string_range(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(
        provider.as_ref(),
        1,
        &[
            (1, "Anna".into()),
            (2, "Anna".into()),
            (3, "Bob".into()),
            (4, "William".into()),
            (5, "William".into()),
            (6, 7.into()),
        ],
    );
    let a = accessor.as_ref();
    assert_eq!(query(a, IndexQuery::range(KEY, "Anna", true, "William", false)), vec![1, 2, 3]);
    assert_eq!(query(a, IndexQuery::range(KEY, "Anna", false, "William", true)), vec![3, 4, 5]);
    assert_eq!(
        query(a, IndexQuery::range_bounds(KEY, Bound::Excluded("Anna".into()), Bound::Unbounded)),
        vec![3, 4, 5]
    );
    assert_eq!(query(a, IndexQuery::range(KEY, "Anna", false, "William", false)), vec![3]);
    assert!(query(a, IndexQuery::range(KEY, "Arabella", false, "Bob", false)).is_empty());
}

pub fn string_predicates(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(
        provider.as_ref(),
        1,
        &[
            (1, "a".into()),
            (2, "A".into()),
            (3, "apa".into()),
            (4, "apa".into()),
            (5, "apa".into()),
            (6, "Apartment".into()),
            (7, "apartment".into()),
            (8, 42.into()),
        ],
    );
    let a = accessor.as_ref();
    assert_eq!(query(a, IndexQuery::string_prefix(KEY, "a")), vec![1, 3, 4, 5, 7]);
    assert_eq!(query(a, IndexQuery::string_prefix(KEY, "apa")), vec![3, 4, 5, 7]);
    assert_eq!(query(a, IndexQuery::string_contains(KEY, "apa")), vec![3, 4, 5, 7]);
    assert!(query(a, IndexQuery::string_contains(KEY, "apa*")).is_empty());
    assert_eq!(query(a, IndexQuery::string_suffix(KEY, "ment")), vec![6, 7]);
    assert!(query(a, IndexQuery::string_suffix(KEY, "apa*")).is_empty());
    assert!(query(a, IndexQuery::string_prefix(KEY, "ap.")).is_empty());
    assert_eq!(query(a, IndexQuery::string_suffix(KEY, "")), vec![1, 2, 3, 4, 5, 6, 7]);
}

pub fn ingestion_is_idempotent(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let entries: Vec<(EntityId, Value)> = vec![
        (1, "x".into()),
        (2, "y".into()),
        (2, "y".into()),
        (3, 10.into()),
        (4, 10.5.into()),
    ];
    let bulk = populate(provider.as_ref(), 1, &entries);

    let mut populator = provider.get_populator(2, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    {
        let mut updater = populator.new_populating_updater(no_lookup()).unwrap();
        for update in adds(&entries) {
            updater.process(update).unwrap();
        }
        updater.close().unwrap();
    }
    populator.close(true).unwrap();
    let one_by_one = provider.get_online_accessor(2, &descriptor(), &sampling()).unwrap();

    for q in [
        IndexQuery::exists(KEY),
        IndexQuery::exact(KEY, "y"),
        IndexQuery::exact(KEY, 10),
        IndexQuery::range(KEY, 0, true, 100, true),
    ] {
        assert_eq!(query(bulk.as_ref(), q.clone()), query(one_by_one.as_ref(), q));
    }
    let bulk_reader = bulk.new_reader().unwrap();
    let other_reader = one_by_one.new_reader().unwrap();
    assert_eq!(
        bulk_reader.count_indexed(2, &[Value::from("y")]).unwrap(),
        other_reader.count_indexed(2, &[Value::from("y")]).unwrap()
    );
}

pub fn touched_resolves_through_lookup(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let schema = descriptor().schema().clone();
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    populator.add(&adds(&[(1, "old".into())])).unwrap();
    {
        let lookup: Arc<dyn PropertyAccessor> =
            Arc::new(|entity: EntityId, _: u32| (entity == 1).then(|| Value::from("new")));
        let mut updater = populator.new_populating_updater(lookup).unwrap();
        updater.process(IndexEntryUpdate::touched(1, &schema)).unwrap();
        updater.close().unwrap();
    }
    populator.close(true).unwrap();

    let accessor = provider.get_online_accessor(1, &descriptor(), &sampling()).unwrap();
    assert!(query(accessor.as_ref(), IndexQuery::exact(KEY, "old")).is_empty());
    assert_eq!(query(accessor.as_ref(), IndexQuery::exact(KEY, "new")), vec![1]);
}

pub fn drop_after_close(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    populator.add(&adds(&[(1, "a".into())])).unwrap();
    populator.close(true).unwrap();
    populator.drop_index().unwrap();
    assert_eq!(provider.get_initial_state(1, &descriptor()), InternalIndexState::Populating);
    assert!(provider.get_online_accessor(1, &descriptor(), &sampling()).is_err());
}

pub fn drop_without_create(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.drop_index().unwrap();
}

pub fn close_without_create(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.close(false).unwrap();
    populator.drop_index().unwrap();
    assert_eq!(provider.get_initial_state(1, &descriptor()), InternalIndexState::Populating);

    // The build claim is free again.
    let mut again = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    again.create().unwrap();
    again.close(false).unwrap();
}

pub fn second_create_is_rejected(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    assert!(populator.create().is_err());
    assert!(provider.get_populator(1, &descriptor(), &sampling()).is_err());
    populator.drop_index().unwrap();
    populator.create().unwrap();
    populator.close(false).unwrap();
}

pub fn mark_as_failed_records_failure(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    populator.mark_as_failed("disk on fire").unwrap();

    assert_eq!(provider.get_initial_state(1, &descriptor()), InternalIndexState::Failed);
    assert_eq!(provider.get_population_failure(1).unwrap(), "disk on fire");

    populator.close(true).unwrap();
    assert_eq!(provider.get_initial_state(1, &descriptor()), InternalIndexState::Failed);
    assert!(provider.get_online_accessor(1, &descriptor(), &sampling()).is_err());
}

pub fn malformed_population_fails_index(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let schema = descriptor().schema().clone();
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    populator
        .add(&[IndexEntryUpdate::remove(1, &schema, "a")])
        .unwrap();
    assert_eq!(provider.get_initial_state(1, &descriptor()), InternalIndexState::Failed);
    assert!(provider.get_population_failure(1).unwrap().contains("REMOVE"));
    populator.close(false).unwrap();
}

pub fn state_survives_restart(open: OpenProvider) {
    let (provider, config, _dir) = setup(open);
    let expected = {
        let accessor = populate(provider.as_ref(), 1, &[(1, "a".into()), (2, 3.into())]);
        let mut populator = provider.get_populator(2, &descriptor(), &sampling()).unwrap();
        populator.create().unwrap();
        populator.mark_as_failed("interrupted").unwrap();
        populator.close(false).unwrap();
        query(accessor.as_ref(), IndexQuery::exists(KEY))
    };
    drop(provider);

    let provider = open(&config);
    assert_eq!(provider.get_initial_state(1, &descriptor()), InternalIndexState::Online);
    assert_eq!(provider.get_initial_state(2, &descriptor()), InternalIndexState::Failed);
    assert_eq!(provider.get_population_failure(2).unwrap(), "interrupted");
    assert_eq!(provider.get_initial_state(3, &descriptor()), InternalIndexState::Populating);

    let accessor = provider.get_online_accessor(1, &descriptor(), &sampling()).unwrap();
    assert_eq!(query(accessor.as_ref(), IndexQuery::exists(KEY)), expected);
    assert_eq!(query(accessor.as_ref(), IndexQuery::exact(KEY, 3)), vec![2]);
}

pub fn rollover_matches_single_partition(open: OpenProvider) {
    let dir = TempDir::new().unwrap();
    let entries: Vec<(EntityId, Value)> = (0..25u64)
        .map(|i| (i * 3 % 25, Value::from((i % 4) as i64)))
        .collect();

    let single = open(&IndexConfig::new(dir.path().join("single")).writer_heap_bytes(15_000_000));
    let sharded_config = IndexConfig::new(dir.path().join("sharded"))
        .writer_heap_bytes(15_000_000)
        .max_entries_per_partition(4);
    let sharded = open(&sharded_config);

    let a = populate(single.as_ref(), 1, &entries);
    let b = populate(sharded.as_ref(), 1, &entries);

    let key = sharded.descriptor().key.clone();
    let partitions = fs::read_dir(sharded_config.root.join(key).join("1"))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_dir())
        .count();
    assert!(partitions > 1);

    for q in [
        IndexQuery::exists(KEY),
        IndexQuery::exact(KEY, 2),
        IndexQuery::range(KEY, 1, true, 3, false),
    ] {
        assert_eq!(query(a.as_ref(), q.clone()), query(b.as_ref(), q));
    }
}

pub fn sampling_statistics(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    populator.configure_sampling(true);
    populator
        .add(&adds(&[(1, "a".into()), (2, "a".into()), (3, "b".into())]))
        .unwrap();
    let sample = populator.sample_result();
    assert_eq!(sample.index_size, 3);
    assert_eq!(sample.unique_values, 2);
    populator.close(true).unwrap();

    let accessor = provider.get_online_accessor(1, &descriptor(), &sampling()).unwrap();
    let reader = accessor.new_reader().unwrap();
    let sample = reader.sample_index().unwrap();
    assert_eq!(sample.index_size, 3);
    assert_eq!(sample.unique_values, 2);
}

pub fn repeated_adds_across_partitions_count_once(open: OpenProvider) {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::new(dir.path())
        .writer_heap_bytes(15_000_000)
        .max_entries_per_partition(1);
    let provider = open(&config);
    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    populator.configure_sampling(true);
    populator.add(&adds(&[(1, "a".into()), (1, "a".into())])).unwrap();
    assert_eq!(populator.sample_result().index_size, 1);
    populator.close(true).unwrap();

    let accessor = provider.get_online_accessor(1, &descriptor(), &sampling()).unwrap();
    assert_eq!(query(accessor.as_ref(), IndexQuery::exists(KEY)), vec![1]);
    let reader = accessor.new_reader().unwrap();
    assert_eq!(reader.count_indexed(1, &[Value::from("a")]).unwrap(), 1);
    assert_eq!(reader.sample_index().unwrap().index_size, 1);
    reader.close().unwrap();
}

pub fn populating_updater_converges_with_bulk_add(open: OpenProvider) {
    let dir = TempDir::new().unwrap();
    let config = IndexConfig::new(dir.path())
        .writer_heap_bytes(15_000_000)
        .max_entries_per_partition(64);
    let provider = open(&config);
    let value = |i: u64| Value::from(format!("v{}", i % 6));
    let scanned: Vec<(EntityId, Value)> = (0..240u64).map(|i| (i, value(i))).collect();
    // Nodes created while the build runs, plus commits repeating scanned ones.
    let committed: Vec<(EntityId, Value)> = (1000..1060u64)
        .map(|i| (i, value(i)))
        .chain(scanned.iter().step_by(4).cloned())
        .collect();

    let mut populator = provider.get_populator(1, &descriptor(), &sampling()).unwrap();
    populator.create().unwrap();
    std::thread::scope(|scope| {
        let building = &populator;
        let (scanned, committed) = (&scanned, &committed);
        scope.spawn(move || {
            for batch in scanned.chunks(16) {
                building.add(&adds(batch)).unwrap();
            }
        });
        scope.spawn(move || {
            for batch in committed.chunks(8) {
                let mut updater = building.new_populating_updater(no_lookup()).unwrap();
                for update in adds(batch) {
                    updater.process(update).unwrap();
                }
                updater.close().unwrap();
            }
        });
    });
    populator.close(true).unwrap();

    let accessor = provider.get_online_accessor(1, &descriptor(), &sampling()).unwrap();
    let expected: Vec<EntityId> = (0..240u64).chain(1000..1060).collect();
    assert_eq!(query(accessor.as_ref(), IndexQuery::exists(KEY)), expected);
    assert_eq!(query(accessor.as_ref(), IndexQuery::exact(KEY, "v0")).len(), 50);
    let reader = accessor.new_reader().unwrap();
    assert_eq!(reader.count_indexed(0, &[value(0)]).unwrap(), 1);
    let sample = reader.sample_index().unwrap();
    assert_eq!(sample.index_size, 300);
    assert_eq!(sample.unique_values, 6);
    reader.close().unwrap();
}

pub fn non_finite_floats_survive_restart(open: OpenProvider) {
    let (provider, config, _dir) = setup(open);
    {
        let accessor = populate(
            provider.as_ref(),
            1,
            &[(1, f64::INFINITY.into()), (2, 3.into()), (3, f64::NEG_INFINITY.into())],
        );
        assert_eq!(query(accessor.as_ref(), IndexQuery::exists(KEY)), vec![1, 2, 3]);
    }
    drop(provider);

    let provider = open(&config);
    let accessor = provider.get_online_accessor(1, &descriptor(), &sampling()).unwrap();
    let a = accessor.as_ref();
    assert_eq!(query(a, IndexQuery::exists(KEY)), vec![1, 2, 3]);
    assert_eq!(query(a, IndexQuery::exact(KEY, 3)), vec![2]);
    assert_eq!(query(a, IndexQuery::exact(KEY, f64::INFINITY)), vec![1]);
    assert_eq!(query(a, IndexQuery::range(KEY, 0, true, f64::INFINITY, true)), vec![1, 2]);
    assert_eq!(
        query(a, IndexQuery::range_bounds(KEY, Bound::Unbounded, Bound::Excluded(0.into()))),
        vec![3]
    );
}

pub fn exact_match_tells_rounded_numbers_apart(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let big = 1i64 << 53;
    // Int(2^53) and Int(2^53 + 1) share an f64 key.
    let accessor = populate(
        provider.as_ref(),
        1,
        &[(1, big.into()), (2, (big + 1).into()), (3, (big as f64).into())],
    );
    let a = accessor.as_ref();
    assert_eq!(query(a, IndexQuery::exact(KEY, big)), vec![1, 3]);
    assert_eq!(query(a, IndexQuery::exact(KEY, big + 1)), vec![2]);
    assert_eq!(query(a, IndexQuery::exact(KEY, big as f64)), vec![1, 3]);
    assert_eq!(query(a, IndexQuery::range(KEY, big, false, big + 1, true)), vec![2]);
}

pub fn readers_see_committed_updates_only_after_close(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let accessor = populate(provider.as_ref(), 1, &[(1, "a".into())]);
    let schema = descriptor().schema().clone();

    let mut updater = accessor.new_updater().unwrap();
    updater.process(IndexEntryUpdate::add(2, &schema, "a")).unwrap();
    assert_eq!(query(accessor.as_ref(), IndexQuery::exact(KEY, "a")), vec![1]);
    updater.close().unwrap();
    assert_eq!(query(accessor.as_ref(), IndexQuery::exact(KEY, "a")), vec![1, 2]);
}

pub fn accessor_drop_and_close(open: OpenProvider) {
    let (provider, _config, _dir) = setup(open);
    let mut accessor = populate(provider.as_ref(), 1, &[(1, "a".into())]);
    accessor.force().unwrap();
    accessor.close().unwrap();
    accessor.close().unwrap();
    assert!(accessor.new_reader().is_err());
    accessor.drop_index().unwrap();
    assert_eq!(provider.get_initial_state(1, &descriptor()), InternalIndexState::Populating);
}

/// Instantiate the suite for one provider constructor.
macro_rules! provider_compat_suite {
    (@tests $open:expr; $($name:ident),* $(,)?) => {
        $(
            #[test]
            fn $name() {
                compat::$name($open);
            }
        )*
    };
    ($open:expr) => {
        provider_compat_suite!(@tests $open;
            duplicates_are_returned,
            updater_absorbs_conflicts,
            updater_changes_are_visible,
            updater_schema_mismatch_is_rejected,
            numeric_range,
            string_range,
            string_predicates,
            ingestion_is_idempotent,
            touched_resolves_through_lookup,
            drop_after_close,
            drop_without_create,
            close_without_create,
            second_create_is_rejected,
            mark_as_failed_records_failure,
            malformed_population_fails_index,
            state_survives_restart,
            rollover_matches_single_partition,
            sampling_statistics,
            repeated_adds_across_partitions_count_once,
            populating_updater_converges_with_bulk_add,
            non_finite_floats_survive_restart,
            exact_match_tells_rounded_numbers_apart,
            readers_see_committed_updates_only_after_close,
            accessor_drop_and_close,
        );
    };
}
