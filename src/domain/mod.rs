// Domain layer: data types shared by the handlers and the ports they talk through.

pub mod model;
pub mod ports;
