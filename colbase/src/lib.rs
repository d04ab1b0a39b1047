mod config;
mod error;
mod rid;

pub use config::Config;
pub use error::{codes, err, err_code, Error, Result};
pub use rid::Rid;
