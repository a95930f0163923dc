//! Utilities for testing linearizability of lock-free data structures, recording a timestamped
//! history the way Lowe describes in [Testing for Linearizability](http://www.cs.ox.ac.uk/people/gavin.lowe/LinearizabiltyTesting/paper.pdf)
//! and searching it for a sequential witness. This should be done by using the
//! LinearizabilityTester struct and the ThreadLog.

//! # Example
//! This is an example of how to use the LinearizabilityTester on a queue. The tester needs
//! a sequential reference data structure along with operations defined on it to match those on
//! the concurrent object.
//! ```
//! use linkedq::structures::Queue;
//! use linkedq::testing::{LinearizabilityResult, LinearizabilityTester, ThreadLog};
//! use std::collections::VecDeque;
//!
//! fn sequential_dequeue(queue: &VecDeque<usize>, _val: Option<usize>) -> (VecDeque<usize>, Option<usize>) {
//!     let mut queue = queue.clone();
//!     let res = queue.pop_front();
//!     (queue, res)
//! }
//!
//! fn sequential_enqueue(queue: &VecDeque<usize>, val: Option<usize>) -> (VecDeque<usize>, Option<usize>) {
//!     let mut queue = queue.clone();
//!     queue.extend(val);
//!     (queue, None)
//! }
//!
//! fn worker(id: usize, log: &mut ThreadLog<Queue<usize>, VecDeque<usize>, usize>) {
//!     if id % 2 == 0 {
//!         log.log_val(Queue::enqueue, id, format!("enqueue: {}", id), sequential_enqueue);
//!     } else {
//!         log.log(Queue::dequeue, "dequeue".to_owned(), sequential_dequeue);
//!     }
//! }
//!
//! let linearizer: LinearizabilityTester<Queue<usize>, VecDeque<usize>, usize>
//!         = LinearizabilityTester::new(4, 50, Queue::new(), VecDeque::new());
//! assert_eq!(linearizer.run(worker), LinearizabilityResult::Success);
//! ```

pub use self::linearizability_tester::{LinearizabilityTester, LinearizabilityResult, ThreadLog};
pub use self::time_stamped::SequentialOp;

pub mod linearizability_tester;
mod search;
mod time_stamped;

/// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
