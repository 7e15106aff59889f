use crate::models::{LessonSnapshot, LessonStatus};

/// Booking page the alert messages link back to.
pub const BOOKING_PAGE_URL: &str = "https://www1.nesty-gcloud.net/gunzesports_mypage/";

pub const OPENED_SUBJECT: &str = "Lesson slot opened";
pub const INITIAL_SUBJECT: &str = "Lesson monitoring started";

/// Body for the full/almost-full to available transition.
pub fn opened(lesson: &LessonSnapshot, previous: LessonStatus) -> String {
    format!(
        "A slot just opened!\n\n\
         Lesson: {}\n\
         Time: {}\n\
         Status: {} -> {}\n\n\
         Book it before it fills up again:\n{}",
        lesson.name,
        lesson.time,
        previous.as_str(),
        lesson.status.as_str(),
        BOOKING_PAGE_URL,
    )
}

/// Softer first-observation body for a lesson that is already open when
/// monitoring begins.
pub fn initial(lesson: &LessonSnapshot) -> String {
    format!(
        "Monitoring started.\n\n\
         Lesson: {}\n\
         Time: {}\n\
         Current status: {}\n\n\
         This lesson has open slots right now:\n{}",
        lesson.name,
        lesson.time,
        lesson.status.as_str(),
        BOOKING_PAGE_URL,
    )
}
