//! Background engine: the control plane loop and the periodic scan.

pub mod control;
pub mod scan;

pub use control::ControlPlane;
pub use scan::{ScanReport, Scanner};
