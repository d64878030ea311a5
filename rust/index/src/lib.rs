pub mod config;
pub mod embedding;
pub mod heatspace;
pub mod quantization;
pub mod widening_array;

// Re-export types
pub use config::*;
pub use embedding::*;
pub use heatspace::*;
pub use quantization::*;
pub use widening_array::*;
