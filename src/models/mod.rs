pub mod attempt;
pub mod group;
pub mod mailing;
pub mod message;
pub mod recipient;
pub mod session;
pub mod settings;
pub mod statistics;
pub mod user;
