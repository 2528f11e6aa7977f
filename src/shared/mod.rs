//! Session state shared by the input, enhancement and recognition steps

pub mod state;

pub use state::OcrSession;
