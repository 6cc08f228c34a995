//! Foreign function interface

mod exports;

pub use exports::*;
