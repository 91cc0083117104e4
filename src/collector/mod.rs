pub mod cycle;
pub mod summary;
pub mod supervisor;
