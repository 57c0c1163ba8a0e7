#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

extern crate blas_src;

pub mod analysis;
pub mod capacity;
pub mod circuit;
pub mod config;
pub mod correlation;
pub(crate) mod error;
pub mod fit;
pub mod io;
pub mod scaling;
pub mod spectrum;
pub mod sweep;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
