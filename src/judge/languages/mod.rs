pub mod compiled;
pub mod interpreted;
pub mod java;
