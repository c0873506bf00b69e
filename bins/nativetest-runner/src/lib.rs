pub mod config;
pub mod decoder;
pub mod discovery;
pub mod engine;
pub mod executor;
pub mod reporter;
pub mod sink;


pub use config::RunnerConfig;
pub use decoder::{ResultDecoder, XmlFailureDecoder};
pub use engine::{CommandLine, ProcessRunner};
pub use executor::{BatchScheduler, CancellationFlag};
