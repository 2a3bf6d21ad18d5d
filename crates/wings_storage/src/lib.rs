mod clock;
mod repository;

pub use clock::{Clock, FixedClock, SystemClock};
pub use repository::{PurgePolicy, ShareStore, StorageConfig};
