pub mod api;
pub mod comments;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod manifest;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod plugins;
pub mod preprocess;
pub mod resolver;
pub mod storage;
pub mod template;
pub mod utils;
mod serialization;

pub use api::{bundle, BuildObserver, BuildOutput, BuildReport, Square};
pub use error::{SquareError, SquareResult};
pub use manifest::ManifestSource;
pub use model::{Collection, Distribution, Package};
