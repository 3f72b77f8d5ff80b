// src/lib.rs

//! Cartelera CDMX crawler library

pub mod browser;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
