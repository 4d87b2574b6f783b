pub mod data;
pub mod error;
pub mod hooks;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod sampler;
pub mod training;
pub mod utils;
