pub mod destination;
pub mod notification;
pub mod record;

pub use destination::Destination;
pub use notification::DeliveryNotification;
pub use record::{RetryState, ShareCounts, ShareId, ShareRecord, ShareState, StateError};
