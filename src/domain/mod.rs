// Domain layer: site and geometry models plus the ports to storage and reference data.

pub mod model;
pub mod ports;
