// Domain layer: migration units, outcomes, reports and the ports adapters implement.

pub mod model;
pub mod ports;
