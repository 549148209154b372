//! Host-based tests for the RGB panel driver
//! These tests run on the development machine, not on the ESP32

pub mod mocks;
