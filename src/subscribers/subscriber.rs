//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for plugging custom event handlers
//! into the runtime. Each subscriber gets a dedicated worker task and a
//! bounded queue, so a slow subscriber only affects itself: when its queue
//! is full, events are dropped for that subscriber and nobody else.

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// ### Rules
/// - `on_event()` runs in a dedicated worker (not in the publisher context)
/// - Events are processed sequentially in FIFO order
/// - Queue overflow drops events for this subscriber only
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    async fn on_event(&self, event: &Event);

    /// Returns the subscriber name for logging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the preferred queue capacity for this subscriber.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
