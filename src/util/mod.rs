pub mod error;
pub mod mode;
