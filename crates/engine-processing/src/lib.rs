pub mod cb;
pub mod collection;
pub mod context;
pub mod dead_letter;
pub mod error;
pub mod exception;
pub mod partition;
pub mod retry;

#[cfg(test)]
mod testing;
