pub mod backend;
pub mod client;
pub mod endpoints;

pub use backend::*;
pub use client::*;
pub use endpoints::*;
