pub mod export;
pub mod schema;
pub mod translation;

pub use export::*;
pub use schema::*;
pub use translation::*;
