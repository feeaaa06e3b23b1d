pub mod ask;
pub mod cli;
pub mod driver;
pub mod log;
pub mod ux;
