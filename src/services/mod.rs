pub mod auth;
pub mod availability;
pub mod booking;
pub mod mailer;
pub mod payment;
pub mod storage;
