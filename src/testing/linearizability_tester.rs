use super::search;
use super::time_stamped::{SequentialOp, TimeStamped};
use rayon::ThreadPoolBuilder;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

/// The verdict on a recorded concurrent history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearizabilityResult {
    Success,
    /// No sequential order explains the history, which is rendered in the message.
    Failure(String),
    /// The history could not be recorded or was malformed.
    Error(String)
}

/// Runs a worker on several threads against a concurrent object `C` and checks the recorded
/// history against a sequential specification `Seq`.
pub struct LinearizabilityTester<C, Seq, Ret> {
    num_threads: usize,
    iterations: usize,
    concurrent: C,
    sequential: Seq,
    _ret: PhantomData<fn() -> Ret>
}

impl<C, Seq, Ret> LinearizabilityTester<C, Seq, Ret>
where C: Sync,
      Seq: Clone + Eq + Hash,
      Ret: Clone + Eq + Debug + Send
{
    pub fn new(num_threads: usize, iterations: usize, concurrent: C, sequential: Seq) -> Self {
        Self {
            num_threads,
            iterations,
            concurrent,
            sequential,
            _ret: PhantomData
        }
    }

    /// Call `worker` `iterations` times on each thread, then search for a linearization.
    pub fn run<W>(&self, worker: W) -> LinearizabilityResult
    where W: Fn(usize, &mut ThreadLog<C, Seq, Ret>) + Sync
    {
        let pool = match ThreadPoolBuilder::new().num_threads(self.num_threads).build() {
            Ok(pool) => pool,
            Err(err) => return LinearizabilityResult::Error(err.to_string())
        };

        let mut logs: Vec<ThreadLog<C, Seq, Ret>> = (0..self.num_threads)
            .map(|id| ThreadLog::new(id, &self.concurrent))
            .collect();
        let iterations = self.iterations;
        let worker = &worker;
        pool.scope(|scope| {
            for log in logs.iter_mut() {
                scope.spawn(move |_| {
                    for _ in 0..iterations {
                        worker(log.id, log);
                    }
                });
            }
        });

        let events = logs.into_iter().map(|log| log.events).collect();
        search::check(&self.sequential, events)
    }
}

/// The events one thread recorded while running its worker.
pub struct ThreadLog<'a, C, Seq, Ret> {
    id: usize,
    concurrent: &'a C,
    events: Vec<TimeStamped<Seq, Ret>>
}

impl<'a, C, Seq, Ret: Clone> ThreadLog<'a, C, Seq, Ret> {
    fn new(id: usize, concurrent: &'a C) -> Self {
        Self {
            id,
            concurrent,
            events: Vec::new()
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run an operation without an argument, such as a dequeue.
    pub fn log<F>(&mut self, op: F, message: String, seq_method: SequentialOp<Seq, Ret>)
    where F: FnOnce(&C) -> Option<Ret>
    {
        self.events.push(TimeStamped::new_invoke(self.id, message, None, seq_method));
        let result = op(self.concurrent);
        self.events.push(TimeStamped::new_return(self.id, result));
    }

    /// Run an operation that takes `val` and whose own result is ignored, such as an enqueue.
    pub fn log_val<F, R>(&mut self, op: F, val: Ret, message: String, seq_method: SequentialOp<Seq, Ret>)
    where F: FnOnce(&C, Ret) -> R
    {
        self.events.push(TimeStamped::new_invoke(self.id, message, Some(val.clone()), seq_method));
        op(self.concurrent, val);
        self.events.push(TimeStamped::new_return(self.id, None));
    }
}
