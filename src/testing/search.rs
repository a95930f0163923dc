//! The search for a sequential witness, after Wing & Gong with Lowe's memoisation of
//! (linearized set, state) configurations.

use super::linearizability_tester::LinearizabilityResult;
use super::time_stamped::{Event, SequentialOp, TimeStamped};
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::mem;

const NIL: usize = usize::MAX;

struct Operation<Seq, Ret> {
    thread: usize,
    message: String,
    op: SequentialOp<Seq, Ret>,
    arg: Option<Ret>,
    result: Option<Ret>
}

/// One invoke or return in the merged history, doubly linked so that an operation can be
/// lifted out while it is tentatively linearized and put back when the search backtracks.
#[derive(Clone, Copy)]
struct Entry {
    op: usize,
    call: bool,
    matched: usize,
    prev: usize,
    next: usize
}

struct History {
    // entries[0] is a sentinel that is never lifted
    entries: Vec<Entry>
}

impl History {
    fn first(&self) -> usize {
        self.entries[0].next
    }

    fn unlink(&mut self, index: usize) {
        let Entry { prev, next, .. } = self.entries[index];
        self.entries[prev].next = next;
        if next != NIL {
            self.entries[next].prev = prev;
        }
    }

    fn relink(&mut self, index: usize) {
        let Entry { prev, next, .. } = self.entries[index];
        self.entries[prev].next = index;
        if next != NIL {
            self.entries[next].prev = index;
        }
    }

    fn lift(&mut self, call: usize) {
        let ret = self.entries[call].matched;
        self.unlink(call);
        self.unlink(ret);
    }

    fn unlift(&mut self, call: usize) {
        let ret = self.entries[call].matched;
        self.relink(ret);
        self.relink(call);
    }
}

struct Linearized {
    bits: Vec<u64>
}

impl Linearized {
    fn new(ops: usize) -> Self {
        Linearized { bits: vec![0; (ops + 63) / 64] }
    }

    fn set(&mut self, op: usize) {
        self.bits[op / 64] |= 1 << (op % 64);
    }

    fn clear(&mut self, op: usize) {
        self.bits[op / 64] &= !(1 << (op % 64));
    }
}

/// Check the per-thread event logs against the sequential object `initial`.
pub fn check<Seq, Ret>(initial: &Seq, logs: Vec<Vec<TimeStamped<Seq, Ret>>>) -> LinearizabilityResult
where Seq: Clone + Eq + Hash,
      Ret: Clone + Eq + Debug
{
    let (ops, mut history) = match build_history(logs) {
        Ok(built) => built,
        Err(message) => return LinearizabilityResult::Error(message)
    };

    let mut state = initial.clone();
    let mut linearized = Linearized::new(ops.len());
    let mut cache: HashSet<(Vec<u64>, Seq)> = HashSet::new();
    let mut stack: Vec<(usize, Seq)> = Vec::new();
    let mut entry = history.first();

    while history.first() != NIL {
        if entry == NIL {
            return LinearizabilityResult::Error("history ends with a pending invoke".to_owned());
        }
        let current = history.entries[entry];
        if current.call {
            let op = &ops[current.op];
            let (next_state, result) = (op.op)(&state, op.arg.clone());
            if result == op.result {
                linearized.set(current.op);
                if cache.insert((linearized.bits.clone(), next_state.clone())) {
                    stack.push((entry, mem::replace(&mut state, next_state)));
                    history.lift(entry);
                    entry = history.first();
                    continue;
                }
                linearized.clear(current.op);
            }
            entry = current.next;
        } else {
            // An operation returned without any order of the pending ones explaining it
            match stack.pop() {
                None => return LinearizabilityResult::Failure(render(&ops)),
                Some((call, previous)) => {
                    state = previous;
                    linearized.clear(history.entries[call].op);
                    history.unlift(call);
                    entry = history.entries[call].next;
                }
            }
        }
    }

    LinearizabilityResult::Success
}

fn build_history<Seq, Ret>(logs: Vec<Vec<TimeStamped<Seq, Ret>>>) -> Result<(Vec<Operation<Seq, Ret>>, History), String> {
    let mut markers: Vec<(TimeStamped<Seq, Ret>, usize)> = Vec::new();
    let mut op_count = 0;
    for events in logs {
        let mut current = NIL;
        for event in events {
            if let Event::Invoke(_) = event.event {
                current = op_count;
                op_count += 1;
            }
            if current == NIL {
                return Err("return logged before any invoke".to_owned());
            }
            markers.push((event, current));
        }
    }
    markers.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut ops: Vec<Option<Operation<Seq, Ret>>> = (0..op_count).map(|_| None).collect();
    let mut calls = vec![NIL; op_count];
    let mut entries = Vec::with_capacity(markers.len() + 1);
    entries.push(Entry { op: NIL, call: false, matched: NIL, prev: NIL, next: NIL });

    for (position, (stamped, op)) in markers.into_iter().enumerate() {
        let index = position + 1;
        let call = match stamped.event {
            Event::Invoke(invoke) => {
                ops[op] = Some(Operation {
                    thread: invoke.id,
                    message: invoke.message,
                    op: invoke.op,
                    arg: invoke.arg,
                    result: None
                });
                calls[op] = index;
                true
            },
            Event::Return(ret) => {
                match (ops[op].as_mut(), calls[op]) {
                    (Some(operation), call) if call != NIL => {
                        operation.result = ret.result;
                        entries[call].matched = index;
                    },
                    _ => return Err(format!("return of operation {} has no invoke", op))
                }
                false
            }
        };
        entries[index - 1].next = index;
        entries.push(Entry { op, call, matched: NIL, prev: index - 1, next: NIL });
    }

    if entries.iter().any(|entry| entry.call && entry.matched == NIL) {
        return Err("an operation never returned".to_owned());
    }

    let ops = ops.into_iter().flatten().collect();
    Ok((ops, History { entries }))
}

fn render<Seq, Ret: Debug>(ops: &[Operation<Seq, Ret>]) -> String {
    ops.iter()
        .map(|op| format!("thread {}: {} -> {:?}", op.thread, op.message, op.result))
        .collect::<Vec<_>>()
        .join("\n")
}
