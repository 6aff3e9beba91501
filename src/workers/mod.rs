pub mod consumer;
pub mod processor;
pub mod reconciler;
