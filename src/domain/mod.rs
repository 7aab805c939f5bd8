// Domain layer: request/response models, fetch state, and the transport port.

pub mod model;
pub mod ports;
