pub mod catalog;
pub mod flash;
