pub mod buffer;
pub mod circle;
pub mod convert;
pub mod export;
pub mod extract;
pub mod job;
pub mod manual;
pub mod parse;
pub mod resolver;
pub mod sandbox;
pub mod search;
pub mod validator;

pub use crate::domain::ports::{ObjectStore, ReferenceAreaStore};
pub use crate::utils::error::Result;
