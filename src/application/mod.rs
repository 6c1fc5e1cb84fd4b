pub mod agent;
pub mod session;
pub mod tooling;
