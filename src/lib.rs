//! procaudit - public procurement ingestion and AI risk-audit pipeline.
//!
//! Ingests procurement records from a public source feed, assembles a
//! budget-bounded evidence package from the attached documents, submits it
//! to a generative-AI auditor, and persists a structured risk verdict
//! exactly once per content version.

pub mod ai;
pub mod cli;
pub mod config;
pub mod convert;
pub mod extract;
pub mod feed;
pub mod models;
pub mod pricing;
pub mod queue;
pub mod ranking;
pub mod repository;
pub mod selection;
pub mod services;
pub mod storage;
