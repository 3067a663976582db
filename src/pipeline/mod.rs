//! Pipeline stages for turning one chapter id into files on disk.
//!
//! Each submodule implements exactly one step, so every step is testable on
//! its own and the network-facing stages can be pointed at a fake server.
//!
//! ## Data Flow
//!
//! ```text
//! resolve ──▶ fetch ──▶ (storage) ──▶ normalize ──▶ compose ◀──▶ seam
//! (page→URLs) (bytes)    raw files    (decode,      (panels)     (cut row)
//!                                      widths)
//! ```
//!
//! 1. [`client`]    — shared HTTP client with the browser identity headers
//! 2. [`resolve`]   — fetch a chapter page and extract its `imgHttps` list
//! 3. [`fetch`]     — download one image and infer its file extension
//! 4. [`normalize`] — decode, orient and width-normalise stored images
//! 5. [`seam`]      — find a low-contrast row near a forced cut point
//! 6. [`compose`]   — single forward pass packing images into panels
//! 7. [`chapter`]   — drive the above for one chapter

pub mod chapter;
pub mod client;
pub mod compose;
pub mod fetch;
pub mod normalize;
pub mod resolve;
pub mod seam;
