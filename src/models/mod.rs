pub mod notification;
pub mod report;
