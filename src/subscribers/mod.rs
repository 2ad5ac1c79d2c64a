//! Event subscribers: the [`Subscribe`] extension point plus built-ins.
//!
//! ```text
//! kernel ── publish(Event) ──► Bus ──► fan-out listener
//!                                          │
//!                                          ├──► [queue] ─► worker ─► LogSubscriber
//!                                          └──► [queue] ─► worker ─► custom subscriber
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogSubscriber;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
