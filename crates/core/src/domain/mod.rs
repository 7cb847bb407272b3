pub mod expense;
pub mod flow;
pub mod user;
