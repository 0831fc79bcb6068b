pub mod codec;
pub mod plan;
pub mod run;
pub mod validate;
