mod bins;
mod format;
mod options;
mod range;

pub use bins::BinIndex;
pub use format::IndexKind;
pub use options::{parse_bin_file, BinOptions, Region, Scale};
pub use range::{LeftOp, Range, RightOp};
