//! Domain services: feature derivation, training, scoring, generation

pub mod content_cache;
pub mod feature_engineering;
pub mod generation_client;
pub mod model;
pub mod model_store;
pub mod pipeline;
pub mod predictor;
pub mod trainer;
