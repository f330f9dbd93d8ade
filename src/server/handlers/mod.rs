pub mod control;
pub mod dashboard;
pub mod status_ws;
