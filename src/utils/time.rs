use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole minutes, rounded down, for display in submit previews.
pub fn whole_minutes(seconds: i32) -> i32 {
    seconds.max(0) / 60
}

/// Seconds left until `deadline`, zero once it has passed.
pub fn seconds_until(deadline: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    (deadline - at).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn minutes_round_down() {
        assert_eq!(whole_minutes(0), 0);
        assert_eq!(whole_minutes(59), 0);
        assert_eq!(whole_minutes(600), 10);
        assert_eq!(whole_minutes(-5), 0);
    }

    #[test]
    fn remaining_never_negative() {
        let at = now();
        assert_eq!(seconds_until(at + Duration::seconds(90), at), 90);
        assert_eq!(seconds_until(at - Duration::seconds(90), at), 0);
    }
}
