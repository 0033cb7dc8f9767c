pub mod auth;
pub mod leaveday;
pub mod payment;
pub mod pet;
pub mod service;
pub mod user;
pub mod webhook;
