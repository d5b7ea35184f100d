use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use rayon::prelude::*;
use tracing::{Level, info};

use crate::domain::FileRecord;
use crate::error::{Result, TarxError};
use crate::index::store::TarSizes;
use crate::read::extract::{Reporter, RetrieveOptions, extract_files, log_at};
use crate::transfer::Transfer;

enum Msg {
    Line { tar: String, level: Level, text: String },
    Done { tar: String },
}

/// Forwards a worker's lines to the ordering coordinator.
struct ChannelReporter {
    tx: Sender<Msg>,
}

impl Reporter for ChannelReporter {
    fn emit(&mut self, tar: &str, level: Level, msg: String) {
        // a closed channel only loses output
        let _ = self.tx.send(Msg::Line {
            tar: tar.to_string(),
            level,
            text: msg,
        });
    }

    fn container_done(&mut self, tar: &str) {
        let _ = self.tx.send(Msg::Done {
            tar: tar.to_string(),
        });
    }
}

/// Split sorted records into at most `workers` slices with no container
/// shared between slices, balancing total bytes greedily (largest
/// container first onto the lightest worker).
pub fn partition(records: &[FileRecord], workers: usize) -> Vec<Vec<FileRecord>> {
    let workers = workers.max(1);
    let groups: Vec<&[FileRecord]> = records.chunk_by(|a, b| a.tar == b.tar).collect();
    let mut by_size: Vec<(u64, usize)> = groups
        .iter()
        .enumerate()
        .map(|(i, g)| (g.iter().map(|r| r.size).sum(), i))
        .collect();
    by_size.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = (0..workers).map(|w| Reverse((0, w))).collect();
    let mut assigned: Vec<Vec<usize>> = vec![Vec::new(); workers];
    for (size, group) in by_size {
        if let Some(Reverse((load, w))) = heap.pop() {
            assigned[w].push(group);
            heap.push(Reverse((load + size, w)));
        }
    }

    assigned
        .into_iter()
        .filter(|g| !g.is_empty())
        .map(|mut idx| {
            idx.sort_unstable();
            idx.into_iter().flat_map(|i| groups[i].iter().cloned()).collect()
        })
        .collect()
}

/// Print lines in container order: lines of the current container go out
/// at once, later containers are held until every earlier one is done.
fn coordinate(rx: Receiver<Msg>, order: Vec<String>) {
    let position: HashMap<String, usize> =
        order.iter().enumerate().map(|(i, t)| (t.clone(), i)).collect();
    let mut next = 0usize;
    let mut pending: BTreeMap<usize, Vec<(Level, String)>> = BTreeMap::new();
    let mut done: HashSet<usize> = HashSet::new();

    for msg in rx {
        match msg {
            Msg::Line { tar, level, text } => {
                let pos = position.get(&tar).copied().unwrap_or(usize::MAX);
                if pos == next {
                    log_at(level, &text);
                } else {
                    pending.entry(pos).or_default().push((level, text));
                }
            }
            Msg::Done { tar } => {
                if let Some(&pos) = position.get(&tar) {
                    done.insert(pos);
                }
                while done.contains(&next) {
                    next += 1;
                    if let Some(lines) = pending.remove(&next) {
                        for (level, text) in lines {
                            log_at(level, &text);
                        }
                    }
                }
            }
        }
    }
    // workers that stopped early leave their lines behind
    for (_, lines) in pending {
        for (level, text) in lines {
            log_at(level, &text);
        }
    }
}

/// Run the engine over `records` on `workers` threads. Checkpoints are not
/// recorded here.
pub fn extract_parallel(
    records: &[FileRecord],
    workers: usize,
    opts: &RetrieveOptions,
    transfer: &dyn Transfer,
    tar_sizes: &TarSizes,
) -> Result<Vec<FileRecord>> {
    let slices = partition(records, workers);
    let mut order: Vec<String> = records.iter().map(|r| r.tar.clone()).collect();
    order.dedup();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(slices.len().max(1))
        .build()
        .map_err(|e| TarxError::Config(format!("worker pool: {e}")))?;

    let (tx, rx) = mpsc::channel::<Msg>();
    let printer = thread::spawn(move || coordinate(rx, order));

    let results: Vec<Result<Vec<FileRecord>>> = pool.install(|| {
        slices
            .par_iter()
            .map(|slice| {
                let mut reporter = ChannelReporter { tx: tx.clone() };
                extract_files(slice, opts, transfer, tar_sizes, &mut reporter, None)
            })
            .collect()
    });
    drop(tx);
    if printer.join().is_err() {
        log_at(Level::WARN, "output coordinator stopped unexpectedly");
    }

    let mut failures = Vec::new();
    for r in results {
        failures.extend(r?);
    }
    failures.sort_by(|a, b| (&a.tar, a.offset).cmp(&(&b.tar, b.offset)));
    info!("{} worker(s) finished", slices.len());
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn rec(tar: &str, offset: u64, size: u64) -> FileRecord {
        FileRecord {
            id: 0,
            name: format!("{tar}-{offset}"),
            size,
            mtime: OffsetDateTime::UNIX_EPOCH,
            md5: None,
            tar: tar.to_string(),
            offset,
        }
    }

    #[test]
    fn containers_never_split_across_workers() {
        let records = vec![
            rec("000000.tar", 0, 100),
            rec("000000.tar", 512, 100),
            rec("000001.tar", 0, 500),
            rec("000002.tar", 0, 50),
            rec("000003.tar", 0, 40),
        ];
        let slices = partition(&records, 2);
        assert_eq!(slices.len(), 2);
        // largest container alone on one worker, the rest on the other
        let tars: Vec<Vec<&str>> = slices
            .iter()
            .map(|s| {
                let mut t: Vec<&str> = s.iter().map(|r| r.tar.as_str()).collect();
                t.dedup();
                t
            })
            .collect();
        assert!(tars.contains(&vec!["000001.tar"]));
        assert!(tars.contains(&vec!["000000.tar", "000002.tar", "000003.tar"]));
        let total: usize = slices.iter().map(Vec::len).sum();
        assert_eq!(total, records.len());
    }

    #[test]
    fn more_workers_than_containers() {
        let records = vec![rec("000000.tar", 0, 1)];
        assert_eq!(partition(&records, 8).len(), 1);
        assert!(partition(&[], 3).is_empty());
    }
}
