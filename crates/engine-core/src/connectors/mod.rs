pub mod broker;
pub mod converter;
pub mod plugin;
pub mod processor;
