//! Processors module - the leaf operations a job is built from
//!
//! This module contains the following submodules:
//! - `archive`: Zip export of tagged images
//! - `script`: Detection/tagging script invocation
//! - `species`: Species mapping loading
//! - `setup`: Initialization setup (logger, folder creation, script check)

pub mod archive;
pub mod script;
pub mod setup;
pub mod species;
