//! Heartbeat Failure Detector
//!
//! Best-effort liveness over UDP multicast: a sender broadcasts beacons on
//! a fixed interval, a receiver collects them into a live-peer view, and a
//! sweep evicts peers that stay quiet past the timeout. The view is
//! eventually accurate, never linearizable.

pub mod beacon;
mod live_view;
mod receiver;
mod sender;

pub use live_view::{LiveView, PeerSighting};
pub use receiver::HeartbeatReceiver;
pub use sender::HeartbeatSender;
