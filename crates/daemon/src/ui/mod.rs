//! User interface helpers for the LanShare daemon.
//!
//! The daemon has no interactive interface of its own; this module renders
//! the share URL as a QR code for the terminal, for PNG files and for the
//! `/qr.png` endpoint.

pub mod qr;

pub use qr::{generate_png_qr, generate_png_qr_bytes, generate_terminal_qr};
