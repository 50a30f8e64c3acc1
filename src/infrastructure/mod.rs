//! Low-level building blocks shared by the table engine

pub mod counter;
pub mod hash;
pub mod lwlock;
