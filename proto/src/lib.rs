extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod job;
pub mod master;
pub mod minion;
