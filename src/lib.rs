//! Multi-threaded statistical machine translation decoder.
//!
//! [`Decoder`] owns a fixed pool of decoding workers sharing one [`Model`].
//! Requests are streams of sentences; results come back in input order
//! through [`Translations`].
//!
//! [`Model`]: smt_core::model::Model

mod decoder;
pub mod directive;
pub mod pool;
mod request;
pub mod trace_init;
mod translation;
mod translations;
mod worker;

#[cfg(test)]
mod tests;

pub use decoder::{Decoder, DecoderBuilder, DecoderError};
pub use request::TranslationRequest;
pub use translation::{TranslatedDerivation, Translation};
pub use translations::Translations;

pub use smt_core;
