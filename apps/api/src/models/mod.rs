pub mod decision;
pub mod module;
pub mod user_state;
