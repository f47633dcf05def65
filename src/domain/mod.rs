// Domain layer: run-scoped facts and the ports the flows depend on.

pub mod model;
pub mod ports;
