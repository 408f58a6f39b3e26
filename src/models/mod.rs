pub mod analysis;
pub mod approval;
pub mod change;
pub mod docs;
pub mod import;
pub mod notification;
pub mod refactor;
pub mod request;
