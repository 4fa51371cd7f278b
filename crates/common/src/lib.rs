// greenroom-common: shared types and protocol for the Greenroom workspace

pub mod protocol;
pub mod types;
