#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

pub mod envelope;
pub mod kdf;
pub mod passphrase;

pub use crate::envelope::*;
pub use crate::kdf::*;
pub use crate::passphrase::*;
