pub mod job_execution;
pub mod persistent_login;
pub mod session;
pub mod user;
pub mod user_profile;
pub mod user_user_profile;

pub use job_execution::Entity as JobExecution;
pub use persistent_login::Entity as PersistentLogin;
pub use session::Entity as Session;
pub use user::Entity as User;
pub use user_profile::Entity as UserProfile;
pub use user_user_profile::Entity as UserUserProfile;
