// Camera domain: device discovery, hardware handles and the synthetic backend.

pub mod backend;
pub mod dummy;
pub mod error;
pub mod types;
