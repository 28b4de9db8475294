//! Network infrastructure: the UDP packet listener and mDNS advertisement.

pub mod advertiser;
pub mod transport;
