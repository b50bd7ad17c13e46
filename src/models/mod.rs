pub mod answer;
pub mod assessment;
pub mod attempt;
pub mod coding_submission;
pub mod proctoring_event;
pub mod session;
