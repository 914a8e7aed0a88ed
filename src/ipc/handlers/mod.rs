pub mod assignments;
pub mod core;
pub mod exchange;
pub mod messaging;
pub mod requests;
pub mod roster;
pub mod setup;
pub mod slots;
pub mod weekly;
