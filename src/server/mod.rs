pub mod builder;
pub mod handler;
pub mod listener;

pub use builder::{ServerBuilder, ServerHandle};
pub use handler::RequestHandler;
