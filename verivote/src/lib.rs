#[macro_use]
extern crate serde;

mod ballot;
mod board;
mod challenge;
mod credential;
mod eligibility;
mod error;
mod fraud;
mod hybrid;
mod ledger;
mod manifest;
mod protocol;
mod secret_share;
mod serde_hex;
mod state;
mod tally;
mod util;

pub use ballot::*;
pub use board::*;
pub use challenge::*;
pub use credential::*;
pub use eligibility::*;
pub use error::*;
pub use fraud::*;
pub use hybrid::*;
pub use ledger::*;
pub use manifest::*;
pub use protocol::*;
pub use secret_share::*;
pub use serde_hex::*;
pub use state::*;
pub use tally::*;
pub use util::*;

#[cfg(test)]
mod tests;
