use std::collections::{BTreeMap, HashSet};

use chrono::{TimeZone, Utc};
use keesync_core::{merge_entries, Entry, FieldValue, TITLE_FIELD};
use proptest::prelude::*;
use uuid::Uuid;

fn side(ids: BTreeMap<u8, Option<i64>>, label: &str) -> Vec<Entry> {
    ids.into_iter()
        .map(|(id, modified)| {
            Entry::with_uuid(Uuid::from_u128(u128::from(id)))
                .with_field(TITLE_FIELD, FieldValue::plain(format!("{label}-{id}")))
                .modified_at(modified.and_then(|seconds| Utc.timestamp_opt(seconds, 0).single()))
        })
        .collect()
}

fn stamps() -> impl Strategy<Value = BTreeMap<u8, Option<i64>>> {
    prop::collection::btree_map(any::<u8>(), prop::option::of(0i64..1_000), 0..24)
}

proptest! {
    #[test]
    fn output_is_the_uuid_union_without_duplicates(local in stamps(), remote in stamps()) {
        let expected: HashSet<u8> = local.keys().chain(remote.keys()).copied().collect();
        let outcome = merge_entries(&side(local, "local"), &side(remote, "remote"));

        let ids: Vec<Uuid> = outcome.entries.iter().map(|entry| entry.uuid).collect();
        let unique: HashSet<Uuid> = ids.iter().copied().collect();
        prop_assert_eq!(ids.len(), unique.len());
        prop_assert_eq!(ids.len(), expected.len());
        prop_assert_eq!(outcome.stats.total(), expected.len());
        for id in expected {
            prop_assert!(unique.contains(&Uuid::from_u128(u128::from(id))));
        }
    }

    #[test]
    fn common_entries_follow_last_writer_wins(local in stamps(), remote in stamps()) {
        let outcome = merge_entries(&side(local.clone(), "local"), &side(remote.clone(), "remote"));

        for entry in &outcome.entries {
            let id = u8::try_from(entry.uuid.as_u128()).expect("small id");
            let title = entry.title().expect("title");
            let expected = match (local.get(&id), remote.get(&id)) {
                (Some(Some(l)), Some(Some(r))) if r > l => "remote",
                (Some(_), _) => "local",
                (None, Some(_)) => "remote",
                (None, None) => unreachable!("entry came from nowhere"),
            };
            prop_assert_eq!(title, format!("{expected}-{id}"));
        }
    }

    #[test]
    fn groups_are_ordered_common_then_local_then_remote(local in stamps(), remote in stamps()) {
        let outcome = merge_entries(&side(local.clone(), "local"), &side(remote.clone(), "remote"));
        let rank = |entry: &Entry| {
            let id = u8::try_from(entry.uuid.as_u128()).expect("small id");
            match (local.contains_key(&id), remote.contains_key(&id)) {
                (true, true) => 0,
                (true, false) => 1,
                _ => 2,
            }
        };
        let ranks: Vec<u8> = outcome.entries.iter().map(rank).collect();
        prop_assert!(ranks.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
