mod bitmap;
mod builder;
mod cost;
mod pair;
mod word;

pub use bitmap::Bitmap;
pub use builder::Builder;
pub use cost::{clustering_factor, markov_size};
pub use pair::PairBitmap;
