use std::cmp::Ordering;
use std::time::Instant;

/// A sequential operation: takes the state and an optional argument, returns the new state
/// and an optional result.
pub type SequentialOp<Seq, Ret> = fn(&Seq, Option<Ret>) -> (Seq, Option<Ret>);

pub struct TimeStamped<Seq, Ret> {
    pub stamp: Instant,
    pub event: Event<Seq, Ret>
}

impl<Seq, Ret> TimeStamped<Seq, Ret> {
    pub fn new_invoke(id: usize, message: String, arg: Option<Ret>,
                      seq_method: SequentialOp<Seq, Ret>) -> Self
    {
        Self {
            stamp: Instant::now(),
            event: Event::Invoke(InvokeEvent {
                id,
                message,
                op: seq_method,
                arg
            })
        }
    }

    pub fn new_return(id: usize, result: Option<Ret>) -> Self {
        Self {
            stamp: Instant::now(),
            event: Event::Return(ReturnEvent {
                id,
                result
            })
        }
    }

    /// Invokes order before returns carrying the same stamp, so that ties count as overlap.
    fn rank(&self) -> u8 {
        match self.event {
            Event::Invoke(_) => 0,
            Event::Return(_) => 1
        }
    }
}

impl<Seq, Ret> Ord for TimeStamped<Seq, Ret> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp.cmp(&other.stamp).then(self.rank().cmp(&other.rank()))
    }
}

impl<Seq, Ret> PartialOrd for TimeStamped<Seq, Ret> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Seq, Ret> PartialEq for TimeStamped<Seq, Ret> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<Seq, Ret> Eq for TimeStamped<Seq, Ret> {}

pub enum Event<Seq, Ret> {
    Invoke(InvokeEvent<Seq, Ret>),
    Return(ReturnEvent<Ret>)
}

pub struct InvokeEvent<Seq, Ret> {
    pub id: usize,
    pub message: String,
    pub op: SequentialOp<Seq, Ret>,
    pub arg: Option<Ret>
}

pub struct ReturnEvent<Ret> {
    pub id: usize,
    pub result: Option<Ret>
}
