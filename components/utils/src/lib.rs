pub mod logger;
pub mod runtime;
