pub mod auth;
pub mod calibration;
pub mod series;

pub use crate::domain::model::{Cell, Table};
pub use crate::domain::ports::{DriveSource, Storage};
pub use crate::utils::error::Result;
