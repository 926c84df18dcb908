pub mod matcher;
pub mod oracle;
pub mod planner;
pub mod prompt;
pub mod session;
