pub mod admin;
pub mod booking;
pub mod caretaker;
pub mod caretaker_service;
pub mod doctor;
pub mod leaveday;
pub mod medical_service;
pub mod owner;
pub mod password_reset;
pub mod payment;
pub mod pet;
pub mod user;
pub mod webhook_event;
