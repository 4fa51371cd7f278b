// Viewer-session library: the engagement state a webinar page holds locally.
//
// Owns the live connection lifecycle (session mint, hello handshake,
// reconnect backoff), the per-feature synchronization units that merge
// snapshots, optimistic local writes, and broadcast changes into one
// coherent view, and the watch-time reporter.
//
// Everything here runs inside a single viewer session's event loop; none
// of the types are shared across threads, so plain `&mut self` state
// machines are used throughout and the network is abstracted behind
// `transport::LiveTransport` so every piece is testable without sockets.

pub mod optimistic;
pub mod sync;
pub mod transport;
pub mod watch;
