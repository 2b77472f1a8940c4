pub mod capture;
pub mod config;
pub mod detection;
pub mod detector;
pub mod dispatcher;
pub mod evidence;
pub mod pipeline;
pub mod throttle;
