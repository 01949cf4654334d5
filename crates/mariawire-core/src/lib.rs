//! Core types for the mariawire packet engine.
//!
//! This crate provides the types shared by every layer of the engine:
//!
//! - `Error` taxonomy (protocol desync, server ERR packets, rejected input)
//! - `Value` for parameters, with `ValueKind` inference for encode dispatch
//! - `Geometry` for spatial values in GeoJSON-shaped form

pub mod error;
pub mod geometry;
pub mod value;

pub use error::{ConfigError, EncodeError, Error, ProtocolError, Result, ServerError};
pub use geometry::{Coord, Geometry, GeometryType};
pub use value::{Value, ValueKind};
