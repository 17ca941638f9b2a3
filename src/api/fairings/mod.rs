pub mod guards;
pub mod utils;
