pub mod lesson;
pub mod monitor;

pub use lesson::{LessonSnapshot, LessonStatus};
pub use monitor::{MonitorConfig, NotifyMethod, SessionRecord};
