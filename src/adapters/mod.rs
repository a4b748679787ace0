// Adapters layer: concrete implementations of the domain ports.

pub mod http;
pub mod local_store;

pub use http::HttpBackend;
pub use local_store::LocalStore;
