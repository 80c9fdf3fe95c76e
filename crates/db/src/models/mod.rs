pub mod notification;
pub mod status;

pub use notification::{
    NewNotification, NotificationRecord, UpsertPreference, UserNotificationPreference,
};
pub use status::NotificationStatus;
