mod client;
mod data_layer;
mod options;
mod wiring;

pub use client::TabletHandle;
pub use data_layer::ApplyError;
pub use data_layer::NoOpDataLayer;
pub use data_layer::TabletDataLayer;
pub use options::ConsensusOptions;
pub use wiring::start_tablet_replica;
pub use wiring::ReplicaCreationError;
pub use wiring::TabletReplicaConfig;
