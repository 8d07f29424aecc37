//! Application services. Each borrows the store for the length of one request.
pub mod accounts;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod events;
pub mod seed;
