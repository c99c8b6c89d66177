//! # API Routes
//!
//! Versioned route modules mounted under `/api/v1`.

pub mod review;
pub mod sessions;
