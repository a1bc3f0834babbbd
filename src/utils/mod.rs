pub mod utils;
pub mod image;
pub mod coordinate;
