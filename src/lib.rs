//! Real-time audio waveform and spectrum viewer.
//!
//! The audio callback assembles fixed-size blocks and publishes them through
//! a lock-free latest-wins bridge ([`bridge`]). The render loop pulls the latest block,
//! windows and transforms it ([`fft`]), and draws both series with partial redraw
//! over a cached background ([`renderer`]).

pub mod bridge;
pub mod capture;
pub mod common;
pub mod display;
pub mod fft;
pub mod pipeline;
pub mod plot;
pub mod renderer;
pub mod surface;
