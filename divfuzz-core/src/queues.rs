use crate::testcase::TestCase;
use parking_lot::{Condvar, Mutex};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Unbounded, thread-safe priority queue over test cases, ordered by `-score` (highest score
/// first). Ties are broken arbitrarily.
///
/// Backed by a flat `Vec` rather than a binary heap: the mutation worker and evaluator both need
/// to remove arbitrary elements by identity (to requeue a rescored champion, or evict a slow
/// parent), which a heap does not support without an auxiliary index. At corpus-bounded scale
/// (at most `capacity` champions plus in-flight children) a linear scan for the maximum is cheap
/// enough; see DESIGN.md.
pub struct MutationQueue {
    items: Mutex<Vec<Arc<TestCase>>>,
    condvar: Condvar,
    closed: AtomicBool,
    rng: Mutex<SmallRng>,
}

impl MutationQueue {
    pub fn new(seed: u64) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            condvar: Condvar::new(),
            closed: AtomicBool::new(false),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    pub fn push(&self, testcase: Arc<TestCase>) {
        let mut items = self.items.lock();
        items.push(testcase);
        self.condvar.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    fn wait_for_item<'a>(
        &self,
        mut items: parking_lot::MutexGuard<'a, Vec<Arc<TestCase>>>,
    ) -> Option<parking_lot::MutexGuard<'a, Vec<Arc<TestCase>>>> {
        while items.is_empty() {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.condvar.wait(&mut items);
            if self.closed.load(Ordering::SeqCst) && items.is_empty() {
                return None;
            }
        }
        Some(items)
    }

    /// Blocks until the highest-scoring test case is available, then removes and returns it.
    /// Returns `None` once the queue has been closed and drained.
    pub fn take_highest_priority(&self) -> Option<Arc<TestCase>> {
        let items = self.items.lock();
        let mut items = self.wait_for_item(items)?;
        let mut best_idx = 0;
        let mut best_score = items[0].score();
        for (idx, tc) in items.iter().enumerate().skip(1) {
            let score = tc.score();
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }
        Some(items.swap_remove(best_idx))
    }

    /// Blocks until at least one test case is available, then removes and returns a uniformly
    /// random element.
    pub fn take_random(&self) -> Option<Arc<TestCase>> {
        let items = self.items.lock();
        let mut items = self.wait_for_item(items)?;
        let idx = self.rng.lock().gen_range(0..items.len());
        Some(items.swap_remove(idx))
    }

    /// Removes the named test case if it is currently queued.
    pub fn remove_by_name(&self, name: &str) -> Option<Arc<TestCase>> {
        let mut items = self.items.lock();
        let pos = items.iter().position(|tc| tc.name == name)?;
        Some(items.swap_remove(pos))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.lock().iter().any(|tc| tc.name == name)
    }

    /// Snapshot of all queued test cases, sorted by score descending. Used for the end-of-run
    /// CSV dump; does not remove anything.
    pub fn snapshot_sorted_desc(&self) -> Vec<Arc<TestCase>> {
        let mut items: Vec<Arc<TestCase>> = self.items.lock().clone();
        items.sort_by(|a, b| b.score().total_cmp(&a.score()));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcase::TestCase;

    #[test]
    fn highest_priority_pick_orders_by_score_descending() {
        let queue = MutationQueue::new(1);
        let low = Arc::new(TestCase::new_seed("low"));
        low.set_score(1.0);
        let high = Arc::new(TestCase::new_seed("high"));
        high.set_score(9.0);
        queue.push(low);
        queue.push(high);

        let picked = queue.take_highest_priority().unwrap();
        assert_eq!(picked.name, "high");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn closed_empty_queue_returns_none() {
        let queue = MutationQueue::new(1);
        queue.close();
        assert!(queue.take_highest_priority().is_none());
    }

    #[test]
    fn remove_by_name_drops_matching_entry() {
        let queue = MutationQueue::new(1);
        queue.push(Arc::new(TestCase::new_seed("a")));
        queue.push(Arc::new(TestCase::new_seed("b")));
        let removed = queue.remove_by_name("a").unwrap();
        assert_eq!(removed.name, "a");
        assert_eq!(queue.len(), 1);
        assert!(queue.remove_by_name("a").is_none());
    }
}
