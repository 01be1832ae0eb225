pub mod canvas;
pub mod ratelimit;
