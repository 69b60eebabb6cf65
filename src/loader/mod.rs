//! Model artifact loading

pub mod linear;

pub use linear::{JsonModelLoader, LinearModel, LINEAR_FORMAT};
