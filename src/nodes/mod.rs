//! Built-in turn nodes.

mod invoke_model;
mod prepare;

pub use invoke_model::InvokeModel;
pub use prepare::PrepareTurn;
