mod bitmap256;
mod error;
pub mod ioutil;

pub use bitmap256::{Bitmap256, DoubleBitmap256};
pub use error::{err, Error, Result};
