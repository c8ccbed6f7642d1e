//! Pipeline stages for email-to-PDF conversion.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ parse ──▶ render ──────────────┐
//!             │                            ▼
//!             └──▶ classify (per attachment) ──▶ dispatch ──▶ working area
//! ```
//!
//! 1. [`parse`]   : raw RFC 5322 bytes into an owned [`parse::ParsedMessage`]
//! 2. [`render`]  : header block + HTML body as one HTML fragment
//! 3. [`classify`]: content type into [`classify::AttachmentKind`]
//! 4. [`dispatch`]: plan names and indices, run each conversion with retry,
//!    persist the result

pub mod classify;
pub mod dispatch;
pub mod parse;
pub mod render;
