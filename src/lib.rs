//! Concordia - Consent-based PHI access decision service
//!
//! This library provides the decision engine, consent lifecycle, cache layer
//! and audit pipeline for the consent microservice. It exposes all modules
//! for testing purposes.

pub mod access;
pub mod audit;
pub mod cache;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod roles;
pub mod settings;
pub mod storage;
pub mod web;
