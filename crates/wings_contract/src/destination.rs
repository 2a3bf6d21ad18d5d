use std::fmt;

use serde::{Deserialize, Serialize};

const SUB_DESTINATION_SHIFT: u32 = 16;
const HALF_MASK: i64 = 0xffff;

/// Where a share goes: an endpoint plus an endpoint-specific sub-target
/// (an album, a folder, a printer).
///
/// The packed [`Destination::hash`] is what gets persisted and is the
/// grouping key for checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub endpoint_id: u16,
    pub destination_id: u16,
}

impl Destination {
    pub const fn new(endpoint_id: u16, destination_id: u16) -> Self {
        Self {
            endpoint_id,
            destination_id,
        }
    }

    pub const fn hash(self) -> i64 {
        ((self.destination_id as i64) << SUB_DESTINATION_SHIFT) | self.endpoint_id as i64
    }

    pub const fn from_hash(hash: i64) -> Self {
        Self {
            endpoint_id: (hash & HALF_MASK) as u16,
            destination_id: ((hash >> SUB_DESTINATION_SHIFT) & HALF_MASK) as u16,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.endpoint_id, self.destination_id)
    }
}

#[cfg(test)]
mod tests {
    use super::Destination;

    #[test]
    fn hash_keeps_endpoint_in_low_bits() {
        let destination = Destination::new(3, 2);
        assert_eq!(destination.hash(), (2 << 16) | 3);
        assert_eq!(Destination::from_hash(destination.hash()), destination);
    }

    #[test]
    fn sub_destinations_of_one_endpoint_do_not_collide() {
        let profile = Destination::new(0, 0);
        let album = Destination::new(0, 1);
        let other_endpoint = Destination::new(1, 0);

        assert_ne!(profile.hash(), album.hash());
        assert_ne!(profile.hash(), other_endpoint.hash());
        assert_ne!(album.hash(), other_endpoint.hash());
    }

    #[test]
    fn extreme_ids_survive_packing() {
        let destination = Destination::new(u16::MAX, u16::MAX);
        assert!(destination.hash() > 0);
        assert_eq!(Destination::from_hash(destination.hash()), destination);
    }
}
