pub mod batch;
pub mod circuit;
pub mod dead_letter;
pub mod error;
pub mod job;
pub mod requests;
