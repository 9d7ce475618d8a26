pub mod ops;
pub mod system;
