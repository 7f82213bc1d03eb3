pub mod burst;
pub mod calibration;
pub mod consts;
pub mod error;
pub mod frame;
pub mod index;
pub mod io;
pub mod pipeline;
pub mod profile;
pub mod reconstruct;
