//! Infrastructure layer: sockets, mDNS, OS input, and on-disk config.

pub mod input;
pub mod network;
pub mod storage;
