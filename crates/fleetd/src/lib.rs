//! Library side of the fleetd binary: daemon wiring and config checking.

pub mod check;
pub mod daemon;
