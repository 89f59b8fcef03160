pub mod extraction;
pub mod retry;
pub mod runtime;
pub mod schedule;
pub mod scheduler;
pub mod serializer;
pub mod stream_adapter;
pub mod transformer;

#[cfg(test)]
pub(crate) mod test_support;
