#![doc = include_str!("../README.md")]

pub mod error;
pub mod framer;
pub mod mib;
pub mod parse;
pub mod trapd;

pub use error::SnmpError;
pub use framer::Framer;
pub use mib::MibDb;
pub use parse::{parse_record, parser_worker};
pub use trapd::{AuthType, PrivacyProtocol, TrapdConfig, User};
