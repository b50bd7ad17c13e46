pub mod answer_service;
pub mod attempt_service;
pub mod finalize_service;
pub mod grading_service;
pub mod judge_service;
pub mod session_service;
