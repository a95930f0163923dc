use crate::error::QueueError;
use crate::memory::HPBRManager;
use crate::structures::utils::atomic_markable::{is_marked, unmark, AtomicMarkablePtr};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use tracing::{debug, warn};

const DEFAULT_MAX_RETIRED: usize = 100;

// Hazard pointer slots
const CURRENT: usize = 0;
const SUCCESSOR: usize = 1;
const PENDING: usize = 2;
const HAZARDS_PER_THREAD: usize = 3;

/// When an enqueue moves the tail pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TailPolicy {
    /// Advance the tail onto the new node after every successful link, paying one extra CAS
    /// so that later enqueues only walk a short distance.
    Eager,
    /// Never move the tail off the dummy node. Every enqueue walks the whole chain, but no
    /// thread ever contends on the tail.
    Lazy
}

impl Default for TailPolicy {
    fn default() -> Self {
        TailPolicy::Eager
    }
}

/// Construction parameters for a [`Queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub tail_policy: TailPolicy,
    /// Nodes a thread retires before it scans the hazard pointers.
    pub max_retired: usize
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            tail_policy: TailPolicy::default(),
            max_retired: DEFAULT_MAX_RETIRED
        }
    }
}

/// A lock-free unbounded FIFO queue.
///
/// The queue is a linked list of nodes hanging off a permanent dummy node. `head` always points
/// at the dummy; an element is dequeued by splicing the dummy's successor out of the list rather
/// than by moving `head`. `tail` points somewhere in the list at or before the last node, and an
/// enqueuer walks forward from it until it finds the end. Whether the tail is ever moved
/// is decided by the [`TailPolicy`].
///
/// A dequeuer claims a node by setting the mark bit on the node's `next` pointer before
/// splicing it out. An enqueuer that runs into a marked node knows the node has left the list
/// and restarts its walk from `head`.
pub struct Queue<T: Send> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    policy: TailPolicy,
    manager: HPBRManager<Node<T>>,
    _marker: PhantomData<T>
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

struct Node<T> {
    value: Option<ManuallyDrop<T>>,
    next: AtomicMarkablePtr<Node<T>>
}

impl<T: Send> Queue<T> {
    /// Create a new Queue that advances its tail eagerly.
    /// # Examples
    /// ```
    /// # use linkedq::structures::Queue;
    /// let queue: Queue<String> = Queue::new();
    /// ```
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a new Queue with the given tail policy.
    /// # Examples
    /// ```
    /// # use linkedq::structures::{Queue, TailPolicy};
    /// let queue: Queue<u32> = Queue::with_policy(TailPolicy::Lazy);
    /// assert_eq!(queue.tail_policy(), TailPolicy::Lazy);
    /// ```
    pub fn with_policy(tail_policy: TailPolicy) -> Self {
        Self::with_config(QueueConfig { tail_policy, ..QueueConfig::default() })
    }

    pub fn with_config(config: QueueConfig) -> Self {
        let dummy_node = Box::into_raw(Box::new(Node::new_dummy_node()));
        debug!(policy = ?config.tail_policy, max_retired = config.max_retired, "creating queue");
        Queue {
            head: AtomicPtr::new(dummy_node),
            tail: AtomicPtr::new(dummy_node),
            policy: config.tail_policy,
            manager: HPBRManager::new(config.max_retired, HAZARDS_PER_THREAD),
            _marker: PhantomData
        }
    }

    pub fn tail_policy(&self) -> TailPolicy {
        self.policy
    }

    fn head(&self) -> *mut Node<T> {
        self.head.load(Ordering::Acquire)
    }

    /// Add a new element to the back of the queue.
    ///
    /// The queue is unbounded, so this always succeeds and returns `true`.
    /// # Examples
    /// ```
    /// # use linkedq::structures::Queue;
    /// let queue: Queue<String> = Queue::new();
    /// assert!(queue.enqueue("hello".to_owned()));
    /// ```
    pub fn enqueue(&self, val: T) -> bool {
        let node = Box::into_raw(Box::new(Node::new(val)));
        let head = self.head();
        // Held until the tail can no longer be pointed at the node by this thread
        self.manager.protect(node, PENDING);
        let mut p = self.protected_tail();
        loop {
            let next = unsafe { (*p).next.load(Ordering::Acquire) };
            if next.is_null() {
                // Linking the node is the linearization point
                if unsafe { (*p).next.compare_exchange(ptr::null_mut(), node) }.is_ok() {
                    if self.policy == TailPolicy::Eager {
                        self.swing_tail(p, node);
                    }
                    self.manager.unprotect(CURRENT);
                    self.manager.unprotect(SUCCESSOR);
                    self.manager.unprotect(PENDING);
                    return true;
                }
            } else if is_marked(next) {
                // p has been dequeued, so the chain past it no longer leads to the end
                self.first_live(head);
                p = head;
            } else {
                debug_assert!(!ptr::eq(next, p), "queue node links to itself");
                if let Some(successor) = unsafe { self.step(p, next) } {
                    if self.policy == TailPolicy::Eager {
                        // Catch up a tail left behind by a stalled enqueuer
                        self.swing_tail(p, successor);
                    }
                    p = successor;
                }
            }
        }
    }

    /// Same as [`enqueue`](Queue::enqueue).
    pub fn offer(&self, val: T) -> bool {
        self.enqueue(val)
    }

    /// Same as [`enqueue`](Queue::enqueue).
    pub fn add(&self, val: T) -> bool {
        self.enqueue(val)
    }

    /// Load the tail and protect it, retrying until the protection is known to have been
    /// published while the tail still pointed at the node.
    fn protected_tail(&self) -> *mut Node<T> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            self.manager.protect(tail, CURRENT);
            if ptr::eq(tail, self.tail.load(Ordering::Acquire)) {
                return tail;
            }
        }
    }

    /// Move from `p` to its successor `next`, protecting `next` in the `CURRENT` slot.
    ///
    /// Returns `None` if `p.next` changed before the protection was published, in which case
    /// the caller must read `p.next` again.
    unsafe fn step(&self, p: *mut Node<T>, next: *mut Node<T>) -> Option<*mut Node<T>> {
        self.manager.protect(next, SUCCESSOR);
        if !ptr::eq((*p).next.load(Ordering::Acquire), next) {
            return None;
        }
        // next is held by SUCCESSOR throughout, so no second validation is needed
        self.manager.protect(next, CURRENT);
        Some(next)
    }

    /// Move the tail from `old` to `node`, which the caller must hold protected.
    ///
    /// A tail that has been sent back to the dummy is moved forward too, since every node
    /// still in the list lies after the dummy.
    fn swing_tail(&self, old: *mut Node<T>, node: *mut Node<T>) {
        let dummy = self.head();
        if self.tail.compare_exchange(old, node, Ordering::SeqCst, Ordering::Relaxed).is_err()
            && (ptr::eq(old, dummy)
                || self.tail.compare_exchange(dummy, node, Ordering::SeqCst, Ordering::Relaxed).is_err())
        {
            return;
        }
        // A dequeuer may have claimed the node before the tail reached it. If it did, it may
        // also have missed the tail when it looked, so the tail is moved off the node here.
        if is_marked(unsafe { (*node).next.load(Ordering::SeqCst) }) {
            let _ = self.tail.compare_exchange(node, dummy, Ordering::SeqCst, Ordering::Relaxed);
        }
    }

    /// Move the tail off `first`, which has just been spliced out from behind `head`.
    ///
    /// The tail goes to `next`, the successor `first` had when it was claimed, as long as `next`
    /// is still in the list. It only falls back to the dummy when there is no such successor.
    fn release_tail(&self, head: *mut Node<T>, first: *mut Node<T>, next: *mut Node<T>) {
        if !ptr::eq(self.tail.load(Ordering::SeqCst), first) {
            return;
        }
        if !next.is_null() {
            self.manager.protect(next, SUCCESSOR);
            // Nodes are retired only after leaving head.next, so this keeps next alive
            let live = ptr::eq(unsafe { (*head).next.load(Ordering::Acquire) }, next);
            if live {
                self.swing_tail(first, next);
            }
            self.manager.unprotect(SUCCESSOR);
            if live {
                return;
            }
        }
        let _ = self.tail.compare_exchange(first, head, Ordering::SeqCst, Ordering::Relaxed);
    }

    /// Splice claimed nodes out from behind the dummy until its successor is unclaimed.
    ///
    /// Returns the first unclaimed node, protected in the `CURRENT` slot, together with its
    /// `next` pointer, or `None` if the queue is empty.
    fn first_live(&self, head: *mut Node<T>) -> Option<(*mut Node<T>, *mut Node<T>)> {
        loop {
            let first = unsafe { (*head).next.load(Ordering::Acquire) };
            if first.is_null() {
                return None;
            }
            self.manager.protect(first, CURRENT);
            if !ptr::eq(first, unsafe { (*head).next.load(Ordering::Acquire) }) {
                continue;
            }
            let next = unsafe { (*first).next.load(Ordering::Acquire) };
            if !is_marked(next) {
                return Some((first, next));
            }
            // Help the claiming dequeuer finish its splice
            let _ = unsafe { (*head).next.compare_exchange(first, unmark(next)) };
        }
    }

    /// Take an element from the front of the queue, or return None if the queue is empty.
    /// # Examples
    /// ```
    /// # use linkedq::structures::Queue;
    /// let queue: Queue<String> = Queue::new();
    /// queue.enqueue("hello".to_owned());
    /// assert_eq!(queue.dequeue(), Some("hello".to_owned()));
    /// assert_eq!(queue.dequeue(), None);
    /// ```
    pub fn dequeue(&self) -> Option<T> {
        let head = self.head();
        loop {
            let (first, next) = match self.first_live(head) {
                Some(found) => found,
                None => {
                    self.manager.unprotect(CURRENT);
                    return None;
                }
            };

            // Claiming the node is the linearization point
            if unsafe { (*first).next.compare_and_mark(next) }.is_err() {
                continue;
            }

            let value = unsafe { Node::take_value(first) };
            // Fails only if a helper already spliced the node
            let _ = unsafe { (*head).next.compare_exchange(first, next) };
            self.release_tail(head, first, next);
            self.manager.retire(first, CURRENT);
            return value;
        }
    }

    /// Same as [`dequeue`](Queue::dequeue).
    pub fn poll(&self) -> Option<T> {
        self.dequeue()
    }

    /// Same as [`dequeue`](Queue::dequeue).
    pub fn remove(&self) -> Option<T> {
        self.dequeue()
    }

    /// Whether the queue held no element at the instant it was observed.
    pub fn is_empty(&self) -> bool {
        let empty = self.first_live(self.head()).is_none();
        self.manager.unprotect(CURRENT);
        empty
    }

    fn unsupported<R>(&self, operation: &'static str) -> Result<R, QueueError> {
        warn!(operation, "unsupported queue operation");
        Err(QueueError::Unsupported(operation))
    }

    /// Counting the elements needs a traversal, which this queue does not offer.
    pub fn len(&self) -> Result<usize, QueueError> {
        self.unsupported("len")
    }

    pub fn contains(&self, _val: &T) -> Result<bool, QueueError> {
        self.unsupported("contains")
    }

    /// Removing from the middle of the queue is not supported.
    pub fn remove_item(&self, _val: &T) -> Result<bool, QueueError> {
        self.unsupported("remove_item")
    }

    pub fn retain<F: FnMut(&T) -> bool>(&self, _keep: F) -> Result<(), QueueError> {
        self.unsupported("retain")
    }

    pub fn clear(&self) -> Result<(), QueueError> {
        self.unsupported("clear")
    }

    pub fn to_vec(&self) -> Result<Vec<T>, QueueError> {
        self.unsupported("to_vec")
    }

    pub fn append_all<I: IntoIterator<Item = T>>(&self, _items: I) -> Result<(), QueueError> {
        self.unsupported("append_all")
    }
}

impl<T: Send + Copy> Queue<T> {
    /// Return a copy of the element at the front of the queue without removing it.
    ///
    /// Restricted to `Copy` elements: a concurrent dequeue moves the element out of its node
    /// while a peek may still be reading it.
    /// # Examples
    /// ```
    /// # use linkedq::structures::Queue;
    /// let queue: Queue<u32> = Queue::new();
    /// assert_eq!(queue.peek(), None);
    /// queue.enqueue(3);
    /// assert_eq!(queue.peek(), Some(3));
    /// assert_eq!(queue.dequeue(), Some(3));
    /// ```
    pub fn peek(&self) -> Option<T> {
        let value = self.first_live(self.head())
            .and_then(|(first, _)| unsafe { (*first).value.as_ref().map(|value| **value) });
        self.manager.unprotect(CURRENT);
        value
    }

    /// Like [`peek`](Queue::peek), but an empty queue is an error.
    pub fn element(&self) -> Result<T, QueueError> {
        self.peek().ok_or(QueueError::Empty)
    }
}

impl<T: Send> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Queue")
            .field("policy", &self.policy)
            .field("manager", &self.manager)
            .finish()
    }
}

impl<T: Send> Drop for Queue<T> {
    fn drop(&mut self) {
        // Every claimed node has been spliced out and handed to the manager by now
        let head = *self.head.get_mut();
        let mut current = unmark(unsafe { (*head).next.load(Ordering::Relaxed) });
        unsafe { drop(Box::from_raw(head)) };
        while !current.is_null() {
            let mut node = unsafe { Box::from_raw(current) };
            let next = node.next.load(Ordering::Relaxed);
            if !is_marked(next) {
                node.drop_value();
            }
            current = unmark(next);
        }
    }
}

impl<T> Node<T> {
    fn new(value: T) -> Self {
        Node {
            value: Some(ManuallyDrop::new(value)),
            next: AtomicMarkablePtr::default()
        }
    }

    fn new_dummy_node() -> Self {
        Node {
            value: None,
            next: AtomicMarkablePtr::default()
        }
    }

    /// Move the value out of a node that the caller has claimed.
    ///
    /// Peekers may still read the value's bytes, so they are left in place; the node is freed
    /// without dropping them.
    unsafe fn take_value(node: *mut Self) -> Option<T> {
        ptr::read(&(*node).value).map(ManuallyDrop::into_inner)
    }

    fn drop_value(&mut self) {
        if let Some(value) = self.value.as_mut() {
            unsafe { ManuallyDrop::drop(value) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Queue, QueueConfig, TailPolicy};
    use crate::error::QueueError;
    use crate::structures::utils::atomic_markable::{is_marked, unmark};
    use crate::testing::init_tracing;
    use crate::testing::{LinearizabilityResult, LinearizabilityTester, ThreadLog};
    use im::Vector;
    use rand::{thread_rng, Rng};
    use std::collections::HashSet;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Instant;
    use tracing::info;

    const POLICIES: [TailPolicy; 2] = [TailPolicy::Eager, TailPolicy::Lazy];

    #[derive(Debug)]
    struct Foo {
        data: usize,
        drops: Arc<AtomicUsize>
    }

    impl Drop for Foo {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Walk the chain from the dummy, returning its length and checking no node links to itself.
    fn chain_length<T: Send>(queue: &Queue<T>) -> usize {
        let mut length = 0;
        unsafe {
            let mut current = (*queue.head.load(Ordering::Acquire)).next.load(Ordering::Acquire);
            while !current.is_null() {
                let next = (*current).next.load(Ordering::Acquire);
                assert!(!is_marked(next));
                assert!(!ptr::eq(next, current));
                length += 1;
                current = unmark(next);
            }
        }
        length
    }

    #[test]
    fn test_queue_single_threaded() {
        init_tracing();
        for &policy in POLICIES.iter() {
            let queue: Queue<u8> = Queue::with_policy(policy);
            assert!(queue.enqueue(8));
            unsafe {
                let first = (*queue.head.load(Ordering::Relaxed)).next.load(Ordering::Relaxed);
                assert_eq!((*first).value.as_ref().map(|value| **value), Some(8));
            }
            queue.enqueue(7);
            assert_eq!(queue.dequeue(), Some(8));
            assert_eq!(queue.dequeue(), Some(7));
            assert_eq!(queue.dequeue(), None);

            for i in 0..100 {
                queue.enqueue(i);
            }
            assert_eq!(chain_length(&queue), 100);
            for i in 0..100 {
                assert_eq!(queue.dequeue(), Some(i));
            }
            assert_eq!(queue.dequeue(), None);
            assert_eq!(chain_length(&queue), 0);
        }
    }

    #[test]
    fn test_empty_dequeue_returns_none_repeatedly() {
        for &policy in POLICIES.iter() {
            let queue: Queue<u32> = Queue::with_policy(policy);
            for _ in 0..1000 {
                assert_eq!(queue.dequeue(), None);
                assert_eq!(queue.poll(), None);
            }
            assert!(queue.is_empty());
            assert_eq!(queue.peek(), None);
            assert_eq!(queue.element(), Err(QueueError::Empty));
        }
    }

    #[test]
    fn test_peek_does_not_remove() {
        let queue: Queue<u32> = Queue::new();
        queue.offer(1);
        queue.add(2);
        assert_eq!(queue.peek(), Some(1));
        assert_eq!(queue.peek(), Some(1));
        assert_eq!(queue.element(), Ok(1));
        assert!(!queue.is_empty());
        assert_eq!(queue.poll(), Some(1));
        assert_eq!(queue.peek(), Some(2));
        assert_eq!(queue.poll(), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unsupported_operations_fail() {
        let queue: Queue<u32> = Queue::new();
        queue.enqueue(1);
        assert_eq!(queue.len(), Err(QueueError::Unsupported("len")));
        assert_eq!(queue.contains(&1), Err(QueueError::Unsupported("contains")));
        assert_eq!(queue.remove_item(&1), Err(QueueError::Unsupported("remove_item")));
        assert_eq!(queue.retain(|_| true), Err(QueueError::Unsupported("retain")));
        assert_eq!(queue.clear(), Err(QueueError::Unsupported("clear")));
        assert_eq!(queue.to_vec(), Err(QueueError::Unsupported("to_vec")));
        assert_eq!(queue.append_all(vec![2, 3]), Err(QueueError::Unsupported("append_all")));
        // Nothing was touched
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_eager_tail_tracks_last_node() {
        let queue: Queue<u32> = Queue::with_policy(TailPolicy::Eager);
        for i in 0..10 {
            queue.enqueue(i);
            let tail = queue.tail.load(Ordering::Acquire);
            unsafe {
                assert!((*tail).next.load(Ordering::Acquire).is_null());
                assert_eq!((*tail).value.as_ref().map(|value| **value), Some(i));
            }
        }
        // Dequeuing the last node hands the tail back to the dummy
        for _ in 0..10 {
            queue.dequeue();
        }
        assert!(ptr::eq(queue.tail.load(Ordering::Acquire), queue.head.load(Ordering::Acquire)));
        queue.enqueue(42);
        assert_eq!(queue.dequeue(), Some(42));
    }

    /// Nodes between the tail and the last node of the chain.
    fn tail_lag<T: Send>(queue: &Queue<T>) -> usize {
        let mut lag = 0;
        unsafe {
            let mut current = queue.tail.load(Ordering::Acquire);
            loop {
                let next = (*current).next.load(Ordering::Acquire);
                assert!(!is_marked(next));
                if next.is_null() {
                    return lag;
                }
                lag += 1;
                current = next;
            }
        }
    }

    #[test]
    fn test_dequeue_hands_tail_to_successor() {
        let queue: Queue<u32> = Queue::with_policy(TailPolicy::Eager);
        for i in 0..3 {
            queue.enqueue(i);
        }
        let dummy = queue.head.load(Ordering::Acquire);
        let (first, second) = unsafe {
            let first = (*dummy).next.load(Ordering::Acquire);
            (first, (*first).next.load(Ordering::Acquire))
        };
        // Leave the tail behind, as an enqueuer stalled before moving it would
        queue.tail.store(first, Ordering::Release);

        assert_eq!(queue.dequeue(), Some(0));
        assert!(ptr::eq(queue.tail.load(Ordering::Acquire), second));
        assert_eq!(tail_lag(&queue), 1);

        for i in 3..1003 {
            queue.enqueue(i);
        }
        assert_eq!(tail_lag(&queue), 0);
        for i in 1..1003 {
            assert_eq!(queue.remove(), Some(i));
        }
        assert!(ptr::eq(queue.tail.load(Ordering::Acquire), dummy));
    }

    #[test]
    fn test_lagging_tail_catches_up() {
        let queue: Queue<u32> = Queue::with_policy(TailPolicy::Eager);
        for i in 0..100 {
            queue.enqueue(i);
        }
        let dummy = queue.head.load(Ordering::Acquire);
        queue.tail.store(dummy, Ordering::Release);
        assert_eq!(tail_lag(&queue), 100);

        queue.enqueue(100);
        assert_eq!(tail_lag(&queue), 0);
        assert_eq!(chain_length(&queue), 101);
    }

    #[test]
    fn test_eager_tail_stays_near_end_under_contention() {
        init_tracing();
        let producers = 8;
        for _ in 0..5 {
            let queue: Arc<Queue<usize>> = Arc::new(Queue::with_policy(TailPolicy::Eager));
            let barrier = Arc::new(Barrier::new(producers));
            let mut waitvec = Vec::new();
            for id in 0..producers {
                let queue_copy = queue.clone();
                let barrier_copy = barrier.clone();
                waitvec.push(thread::spawn(move || {
                    barrier_copy.wait();
                    for j in 0..5000 {
                        queue_copy.enqueue(id * 5000 + j);
                    }
                }));
            }
            for handle in waitvec {
                handle.join().unwrap();
            }
            let lag = tail_lag(&queue);
            assert!(lag <= producers, "tail is {} nodes behind the end", lag);
            assert_eq!(chain_length(&queue), producers * 5000);
        }
    }

    #[test]
    fn test_eager_tail_not_reset_while_draining() {
        let queue: Arc<Queue<usize>> = Arc::new(Queue::with_policy(TailPolicy::Eager));
        let dummy = queue.head.load(Ordering::Acquire);
        let producer = {
            let queue_copy = queue.clone();
            thread::spawn(move || {
                for i in 0..20000 {
                    queue_copy.enqueue(i);
                }
            })
        };
        let consumer = {
            let queue_copy = queue.clone();
            thread::spawn(move || {
                let mut received = 0;
                while received < 10000 {
                    if queue_copy.dequeue().is_some() {
                        received += 1;
                    }
                }
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();

        // 10,000 values are still queued, so the tail has no reason to sit on the dummy
        assert_eq!(chain_length(&queue), 10000);
        assert!(!ptr::eq(queue.tail.load(Ordering::Acquire), dummy));
        assert_eq!(tail_lag(&queue), 0);
    }

    #[test]
    fn test_lazy_tail_never_moves() {
        let queue: Queue<u32> = Queue::with_policy(TailPolicy::Lazy);
        let dummy = queue.head.load(Ordering::Acquire);
        for i in 0..50 {
            queue.enqueue(i);
            assert!(ptr::eq(queue.tail.load(Ordering::Acquire), dummy));
        }
        for i in 0..25 {
            assert_eq!(queue.dequeue(), Some(i));
            assert!(ptr::eq(queue.tail.load(Ordering::Acquire), dummy));
        }
        assert_eq!(chain_length(&queue), 25);
    }

    #[test]
    fn test_drop_releases_every_value_once() {
        for &policy in POLICIES.iter() {
            let drops = Arc::new(AtomicUsize::new(0));
            {
                let config = QueueConfig { tail_policy: policy, max_retired: 4 };
                let queue: Queue<Foo> = Queue::with_config(config);
                for data in 0..20 {
                    queue.enqueue(Foo { data, drops: drops.clone() });
                }
                for data in 0..12 {
                    let foo = queue.dequeue();
                    assert_eq!(foo.map(|foo| foo.data), Some(data));
                }
                assert_eq!(drops.load(Ordering::SeqCst), 12);
            }
            assert_eq!(drops.load(Ordering::SeqCst), 20);
        }
    }

    #[test]
    fn test_queue_multithreaded() {
        init_tracing();
        for &(policy, per_thread) in [(TailPolicy::Eager, 10000), (TailPolicy::Lazy, 500)].iter() {
            let queue: Arc<Queue<usize>> = Arc::new(Queue::with_policy(policy));
            let mut waitvec: Vec<thread::JoinHandle<Vec<usize>>> = Vec::new();

            for i in 0..8 {
                let queue_copy = queue.clone();
                waitvec.push(thread::spawn(move || {
                    for j in 0..per_thread {
                        queue_copy.enqueue(i * per_thread + j);
                    }
                    Vec::new()
                }));
                let queue_copy = queue.clone();
                waitvec.push(thread::spawn(move || {
                    let mut seen = Vec::with_capacity(per_thread);
                    while seen.len() < per_thread {
                        if let Some(val) = queue_copy.dequeue() {
                            seen.push(val);
                        }
                    }
                    seen
                }));
            }

            let mut seen = HashSet::new();
            for handle in waitvec {
                for val in handle.join().unwrap() {
                    assert!(seen.insert(val), "{} dequeued twice", val);
                }
            }
            assert_eq!(seen.len(), 8 * per_thread);
            assert_eq!(queue.dequeue(), None);
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn test_values_dropped_once_under_contention() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let queue: Arc<Queue<Foo>> = Arc::new(Queue::new());
            let mut waitvec = Vec::new();
            for _ in 0..4 {
                let queue_copy = queue.clone();
                let drops_copy = drops.clone();
                waitvec.push(thread::spawn(move || {
                    for data in 0..5000 {
                        queue_copy.enqueue(Foo { data, drops: drops_copy.clone() });
                        if data % 3 == 0 {
                            queue_copy.dequeue();
                        }
                    }
                }));
            }
            for handle in waitvec {
                handle.join().unwrap();
            }
        }
        assert_eq!(drops.load(Ordering::SeqCst), 20000);
    }

    #[test]
    fn test_fifo_per_producer() {
        for &(policy, per_thread) in [(TailPolicy::Eager, 20000), (TailPolicy::Lazy, 1000)].iter() {
            let queue: Arc<Queue<(usize, usize)>> = Arc::new(Queue::with_policy(policy));
            let producers = 4;
            let mut waitvec = Vec::new();
            for id in 0..producers {
                let queue_copy = queue.clone();
                waitvec.push(thread::spawn(move || {
                    for seq in 0..per_thread {
                        queue_copy.enqueue((id, seq));
                    }
                }));
            }

            let mut last: Vec<Option<usize>> = vec![None; producers];
            let mut received = 0;
            while received < producers * per_thread {
                if let Some((id, seq)) = queue.dequeue() {
                    if let Some(previous) = last[id] {
                        assert!(previous < seq, "producer {} out of order: {} then {}", id, previous, seq);
                    }
                    last[id] = Some(seq);
                    received += 1;
                }
            }
            for handle in waitvec {
                handle.join().unwrap();
            }
            assert_eq!(queue.dequeue(), None);
        }
    }

    /// 10,000 preloaded values drained by 15 racing consumers.
    fn drain_with_consumers(policy: TailPolicy, range: usize, consumers: usize) {
        let queue: Arc<Queue<usize>> = Arc::new(Queue::with_policy(policy));
        for i in 0..range {
            queue.enqueue(i);
        }

        let barrier = Arc::new(Barrier::new(consumers));
        let mut waitvec = Vec::new();
        for _ in 0..consumers {
            let queue_copy = queue.clone();
            let barrier_copy = barrier.clone();
            waitvec.push(thread::spawn(move || {
                barrier_copy.wait();
                let mut seen = Vec::new();
                while let Some(val) = queue_copy.dequeue() {
                    seen.push(val);
                }
                seen
            }));
        }

        let mut seen = vec![false; range];
        for handle in waitvec {
            for val in handle.join().unwrap() {
                assert!(!seen[val], "{} dequeued twice", val);
                seen[val] = true;
            }
        }
        assert!(seen.iter().all(|&found| found));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_eager() {
        drain_with_consumers(TailPolicy::Eager, 10000, 15);
    }

    #[test]
    fn test_drain_lazy() {
        drain_with_consumers(TailPolicy::Lazy, 2000, 15);
    }

    #[test]
    #[ignore]
    fn test_drain_lazy_full() {
        drain_with_consumers(TailPolicy::Lazy, 10000, 15);
    }

    #[test]
    fn test_policies_equivalent() {
        init_tracing();
        let ops: Vec<Option<u32>> = (0..3000)
            .map(|_| if thread_rng().gen_range(0..100) < 60 { Some(thread_rng().gen()) } else { None })
            .collect();

        let mut outputs = Vec::new();
        for &policy in POLICIES.iter() {
            let queue: Queue<u32> = Queue::with_policy(policy);
            let start = Instant::now();
            let output: Vec<Option<u32>> = ops.iter()
                .map(|op| match *op {
                    Some(val) => { queue.enqueue(val); None },
                    None => queue.dequeue()
                })
                .collect();
            info!(?policy, elapsed = ?start.elapsed(), "replayed operations");
            outputs.push(output);
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    fn sequential_dequeue(queue: &Vector<usize>, _val: Option<usize>) -> (Vector<usize>, Option<usize>) {
        let mut queue = queue.clone();
        let res = queue.pop_front();
        (queue, res)
    }

    fn sequential_enqueue(queue: &Vector<usize>, val: Option<usize>) -> (Vector<usize>, Option<usize>) {
        let mut queue = queue.clone();
        if let Some(val) = val {
            queue.push_back(val);
        }
        (queue, None)
    }

    fn sequential_peek(queue: &Vector<usize>, _val: Option<usize>) -> (Vector<usize>, Option<usize>) {
        (queue.clone(), queue.front().cloned())
    }

    fn worker(id: usize, log: &mut ThreadLog<Queue<usize>, Vector<usize>, usize>) {
        let rand = thread_rng().gen_range(0..101);
        if rand < 40 {
            let val = id * 1_000_000 + thread_rng().gen_range(0..1_000_000);
            log.log_val(Queue::enqueue, val, format!("enqueue: {}", val), sequential_enqueue);
        } else if rand < 90 {
            log.log(Queue::dequeue, "dequeue".to_owned(), sequential_dequeue);
        } else {
            log.log(Queue::peek, "peek".to_owned(), sequential_peek);
        }
    }

    #[test]
    fn test_linearizable() {
        for &policy in POLICIES.iter() {
            let queue: Queue<usize> = Queue::with_policy(policy);
            let sequential: Vector<usize> = Vector::new();
            let linearizer: LinearizabilityTester<Queue<usize>, Vector<usize>, usize>
                = LinearizabilityTester::new(4, 200, queue, sequential);

            let result = linearizer.run(worker);
            match result {
                LinearizabilityResult::Success => {},
                other => panic!("{:?} queue not linearizable: {:?}", policy, other)
            }
        }
    }
}
