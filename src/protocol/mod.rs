pub mod link;
pub mod ports;
