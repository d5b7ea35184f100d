use std::collections::HashMap;
use std::collections::hash_map::Entry;

use time::OffsetDateTime;

use crate::domain::{FileRecord, tar_index};

/// Latest archived state of one name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Latest {
    pub id: i64,
    pub size: u64,
    pub mtime: OffsetDateTime,
}

/// Latest-per-name view of the `files` log, built in one pass.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    by_name: HashMap<String, Latest>,
}

impl Snapshot {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = FileRecord>,
    {
        let mut by_name: HashMap<String, Latest> = HashMap::new();
        for rec in records {
            let candidate = Latest {
                id: rec.id,
                size: rec.size,
                mtime: rec.mtime,
            };
            match by_name.entry(rec.name) {
                Entry::Vacant(v) => {
                    v.insert(candidate);
                }
                Entry::Occupied(mut o) => {
                    let cur = o.get();
                    if (candidate.mtime, candidate.id) > (cur.mtime, cur.id) {
                        o.insert(candidate);
                    }
                }
            }
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Latest> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Keep one record per name (latest by mtime, then id) and order the
/// survivors for sequential container access.
pub fn dedup_latest(records: Vec<FileRecord>) -> Vec<FileRecord> {
    let mut latest: HashMap<String, FileRecord> = HashMap::with_capacity(records.len());
    for rec in records {
        match latest.entry(rec.name.clone()) {
            Entry::Vacant(v) => {
                v.insert(rec);
            }
            Entry::Occupied(mut o) => {
                if rec.recency() > o.get().recency() {
                    o.insert(rec);
                }
            }
        }
    }
    let mut out: Vec<FileRecord> = latest.into_values().collect();
    sort_for_retrieval(&mut out);
    out
}

/// Order by container then offset.
pub fn sort_for_retrieval(records: &mut [FileRecord]) {
    records.sort_by(|a, b| {
        (tar_index(&a.tar), &a.tar, a.offset).cmp(&(tar_index(&b.tar), &b.tar, b.offset))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn rec(id: i64, name: &str, mtime: OffsetDateTime, tar: &str, offset: u64) -> FileRecord {
        FileRecord {
            id,
            name: name.to_string(),
            size: 1,
            mtime,
            md5: None,
            tar: tar.to_string(),
            offset,
        }
    }

    #[test]
    fn newest_mtime_wins_then_larger_id() {
        let old = datetime!(2024-01-01 00:00:00 UTC);
        let new = datetime!(2024-02-01 00:00:00 UTC);
        let snap = Snapshot::from_records(vec![
            rec(1, "a", new, "000000.tar", 0),
            rec(2, "a", old, "000001.tar", 0),
            rec(3, "b", old, "000000.tar", 512),
            rec(4, "b", old, "000001.tar", 512),
        ]);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("a").unwrap().id, 1);
        assert_eq!(snap.get("b").unwrap().id, 4);
    }

    #[test]
    fn dedup_orders_by_container_and_offset() {
        let t = datetime!(2024-01-01 00:00:00 UTC);
        let out = dedup_latest(vec![
            rec(1, "z", t, "000001.tar", 0),
            rec(2, "y", t, "000000.tar", 2048),
            rec(3, "x", t, "000000.tar", 0),
            rec(4, "z", t, "000002.tar", 512),
        ]);
        let order: Vec<_> = out.iter().map(|r| (r.tar.as_str(), r.offset)).collect();
        assert_eq!(
            order,
            vec![("000000.tar", 0), ("000000.tar", 2048), ("000002.tar", 512)]
        );
    }
}
