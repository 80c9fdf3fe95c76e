pub mod notification_repo;
pub mod preference_repo;

pub use notification_repo::NotificationRepo;
pub use preference_repo::PreferenceRepo;
