//! Drivers that work on the mapping and the audio library

pub mod orchestrator;
pub mod renamer;
pub mod structure;
