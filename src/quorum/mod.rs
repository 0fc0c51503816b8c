mod config;
mod tracker;

pub use config::MemberType;
pub use config::MembershipError;
pub use config::QuorumConfig;
pub(crate) use tracker::QuorumTracker;
