//! HTTP service that renders posted HTML documents to PDF through an external
//! `wkhtmltopdf` process.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
