pub use self::queue::{Queue, QueueConfig, TailPolicy};

mod queue;
mod utils;
