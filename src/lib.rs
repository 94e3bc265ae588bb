#[macro_use]
extern crate rocket;

pub mod boot;
pub mod cache;
pub mod db;
pub mod mailer;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod security;
pub mod store;
pub mod validation;

#[cfg(test)]
mod tests;
