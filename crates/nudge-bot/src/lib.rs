pub mod bot;
pub mod dispatcher;
pub mod http;
pub mod llm;
pub mod reminder;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
