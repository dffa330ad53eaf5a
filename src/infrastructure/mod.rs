pub mod bluetooth;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod socket;
pub mod status;
