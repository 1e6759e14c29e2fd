#![no_std]

pub mod console;
pub mod geometry;
pub mod pattern;
pub mod sd_bridge;
pub mod sequencer;
pub mod storage;
