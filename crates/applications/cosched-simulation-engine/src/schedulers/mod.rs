//! Scheduler implementations

mod easy;
mod fifo;
pub mod matching;
mod ranks;

pub use easy::EasyScheduler;
pub use fifo::FifoScheduler;
pub use matching::Matching;
pub use ranks::RanksCoscheduler;
