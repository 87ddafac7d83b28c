pub mod analyser;
pub mod device;
pub mod microphone;
