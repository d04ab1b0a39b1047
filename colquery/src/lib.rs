mod persist;
mod query;
mod state;
mod token;

pub use persist::{read, write, Recovered};
pub use query::Query;
pub use state::QueryState;
pub use token::generate as generate_token;
