#![allow(dead_code)]

pub mod app;
pub mod builders;
pub mod db;

pub use app::{cookie_pairs, remember_me_cookie, set_cookies, TestApp};
pub use builders::UserBuilder;
pub use db::{backdate_persistent_login, rename_table, TestDb};
