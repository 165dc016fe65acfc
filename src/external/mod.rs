pub mod runner;
pub mod tools;
