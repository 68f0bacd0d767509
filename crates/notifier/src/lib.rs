pub mod classify;
pub mod discord;
pub mod grant;
pub mod mock;
pub mod platform;
pub mod queue;
pub mod session;
pub mod worker;
