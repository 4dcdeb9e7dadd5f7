//! Custom parallel evaluation wrapper with a per-task completion hook.
//!
//! `rayon`'s `par_iter` joins all tasks before the caller sees anything,
//! which produces the "jumpy progress" pathology Design Note §9 calls out.
//! `map_with_progress` instead dispatches the batch onto a dedicated rayon
//! pool via a channel and drains results as they land, invoking `on_complete`
//! after each one — progress reporting stays smooth regardless of batch size
//! (grounded on the teacher's `rayon`-based `parallel_data_collection`,
//! generalized from a one-shot collection into a completion-streamed map).

use std::sync::mpsc;

/// Evaluates `f` over every item in `items`, bounded to `worker_cap`
/// concurrent tasks, invoking `on_complete(index, &output)` as each task
/// finishes (not only at the end of the batch). Returns outputs in the same
/// order as `items`.
pub fn map_with_progress<T, R, F>(items: &[T], worker_cap: usize, f: F, on_complete: impl Fn(usize, &R) + Sync) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_cap.max(1))
        .build()
        .expect("failed to build optimizer worker pool");

    let (tx, rx) = mpsc::channel::<(usize, R)>();
    let tx_producer = tx.clone();

    std::thread::scope(|s| {
        // Dispatch from a thread that is never one of `pool`'s own workers.
        // The old code called `pool.scope` directly from here and drained
        // the channel inside that same scope body — with `worker_cap == 1`
        // the sole worker thread ran the scope body, blocked on `rx.recv()`,
        // and never returned to the scheduler to run the task it had just
        // spawned: a permanent deadlock. Draining on this thread instead
        // (which never enters `pool`) leaves every one of `pool`'s workers
        // free to execute spawned tasks regardless of `worker_cap`.
        s.spawn(move || {
            pool.scope(|scope| {
                for (idx, item) in items.iter().enumerate() {
                    let tx = tx_producer.clone();
                    let f = &f;
                    scope.spawn(move |_| {
                        let result = f(item);
                        let _ = tx.send((idx, result));
                    });
                }
            });
        });
        drop(tx);

        let mut results: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
        let mut received = 0usize;
        while received < items.len() {
            if let Ok((idx, result)) = rx.recv() {
                on_complete(idx, &result);
                results[idx] = Some(result);
                received += 1;
            } else {
                break;
            }
        }
        results.into_iter().map(|r| r.expect("every index must be filled")).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn completion_hook_fires_once_per_item_and_preserves_order() {
        let items: Vec<u32> = (0..50).collect();
        let completions = AtomicUsize::new(0);
        let results = map_with_progress(&items, 4, |x| x * 2, |_idx, _r| {
            completions.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(completions.load(Ordering::SeqCst), 50);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r, i as u32 * 2);
        }
    }

    /// `worker_cap == 1` is a legitimate default on single-vCPU containers
    /// (`config.rs`'s `available_parallelism()` fallback). The drain loop
    /// used to run on a pool worker thread, so with only one worker it could
    /// never get back to executing the tasks it had just spawned.
    #[test]
    fn single_worker_does_not_deadlock() {
        let items: Vec<u32> = (0..20).collect();
        let completions = AtomicUsize::new(0);
        let results = map_with_progress(&items, 1, |x| x * 3, |_idx, _r| {
            completions.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(completions.load(Ordering::SeqCst), 20);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r, i as u32 * 3);
        }
    }
}
