pub mod consistency_validator;
pub mod dax_lexer;
pub mod sql_validator;

pub use consistency_validator::ConsistencyValidator;
pub use sql_validator::SqlValidator;
