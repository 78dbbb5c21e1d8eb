#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(docsrs, loom)))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]

#[macro_use]
pub(crate) mod util;
pub(crate) mod loom;

pub mod bridge;
pub mod clock;
pub mod coroutine;
pub mod scheduler;
pub mod task;

#[doc(inline)]
pub use self::bridge::{Semaphore, Setter};
#[doc(inline)]
pub use self::clock::{Clock, Ticks};
#[doc(inline)]
pub use self::coroutine::{Coroutine, Resume, ResumePoint, Routine, Step};
#[doc(inline)]
pub use self::scheduler::{
    CapacityExceeded, Context, Entry, Mode, NotFound, Pass, Schedule, Scheduler, TaskOrder,
};
#[doc(inline)]
pub use self::task::{Task, TaskRef};
