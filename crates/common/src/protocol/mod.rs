pub mod ws;

/// Protocol identifier clients send when creating a live session.
pub const CURRENT_PROTOCOL_VERSION: &str = "greenroom-live.v1";
