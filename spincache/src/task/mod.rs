//! Optional background helpers. The cache itself never starts a thread.

pub mod ticker;
