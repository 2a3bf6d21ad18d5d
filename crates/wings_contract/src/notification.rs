use serde::{Deserialize, Serialize};

use crate::destination::Destination;

/// User-facing summary of a successful batch for one destination.
///
/// `id` is the destination hash, so a newer notification for the same
/// destination replaces the previous one on hosts that key by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryNotification {
    pub id: i64,
    pub title: String,
    pub message: String,
    pub ticker: String,
    pub intent_uri: Option<String>,
}

impl DeliveryNotification {
    pub fn shared(
        destination: Destination,
        service: &str,
        location: &str,
        shared: usize,
        intent_uri: Option<String>,
    ) -> Self {
        let message = if shared > 1 {
            format!("{shared} photos shared to {location}")
        } else {
            format!("Photo shared to {location}")
        };

        Self {
            id: destination.hash(),
            title: format!("Shared to {service}"),
            message,
            ticker: format!("{service} share completed"),
            intent_uri,
        }
    }
}
