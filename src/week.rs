use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;

/// How many weeks past the current week a client may page forward.
pub const FORWARD_WEEKS_LIMIT: i64 = 2;

/// Monday of the week containing `date`. Sunday maps to "go back 6 days".
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let back = match date.weekday() {
        Weekday::Sun => 6,
        wd => wd.num_days_from_monday() as i64,
    };
    date - Duration::days(back)
}

/// The seven calendar dates of the week beginning at `start`.
pub fn week_days(start: NaiveDate) -> [NaiveDate; 7] {
    [
        start,
        start + Duration::days(1),
        start + Duration::days(2),
        start + Duration::days(3),
        start + Duration::days(4),
        start + Duration::days(5),
        start + Duration::days(6),
    ]
}

/// Paging forward is allowed while the next candidate week stays within
/// `today`'s week plus the forward limit. No lower bound going back.
pub fn can_go_next_with_limit(
    current_week_start: NaiveDate,
    today: NaiveDate,
    forward_weeks: i64,
) -> bool {
    let next = current_week_start + Duration::weeks(1);
    let bound = week_start(today) + Duration::weeks(forward_weeks);
    next <= bound
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: String,
    pub date: String,
    pub content: String,
    pub is_completed: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentItem {
    pub id: String,
    pub date: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub date: String,
    pub tasks: Vec<TaskItem>,
    pub comments: Vec<CommentItem>,
    pub completed_count: usize,
    pub total_count: usize,
    pub percent: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekView {
    pub days: Vec<DayBucket>,
    pub completed_count: usize,
    pub total_count: usize,
    pub percent: u32,
}

/// completed / total rounded to the nearest integer percent; 0 when empty.
pub fn completion_percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u32
}

/// Partition a week's flat task and comment lists across the seven days of
/// the week starting at `start`, by exact date match. Items dated outside
/// the week are dropped.
pub fn aggregate_week(start: NaiveDate, tasks: &[TaskItem], comments: &[CommentItem]) -> WeekView {
    let mut days: Vec<DayBucket> = week_days(start)
        .iter()
        .map(|d| {
            let date = d.format("%Y-%m-%d").to_string();
            let day_tasks: Vec<TaskItem> = tasks
                .iter()
                .filter(|t| t.date == date)
                .cloned()
                .collect();
            let day_comments: Vec<CommentItem> = comments
                .iter()
                .filter(|c| c.date == date)
                .cloned()
                .collect();
            let total_count = day_tasks.len();
            let completed_count = day_tasks.iter().filter(|t| t.is_completed).count();
            DayBucket {
                date,
                tasks: day_tasks,
                comments: day_comments,
                completed_count,
                total_count,
                percent: completion_percent(completed_count, total_count),
            }
        })
        .collect();

    for day in &mut days {
        day.tasks.sort_by(|a, b| a.sort_order.cmp(&b.sort_order));
    }

    let total_count: usize = days.iter().map(|d| d.total_count).sum();
    let completed_count: usize = days.iter().map(|d| d.completed_count).sum();
    WeekView {
        completed_count,
        total_count,
        percent: completion_percent(completed_count, total_count),
        days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn task(id: &str, date: &str, done: bool, order: i64) -> TaskItem {
        TaskItem {
            id: id.to_string(),
            date: date.to_string(),
            content: format!("task {}", id),
            is_completed: done,
            sort_order: order,
        }
    }

    #[test]
    fn week_start_is_always_monday() {
        assert_eq!(week_start(d("2024-06-13")), d("2024-06-10"));
        assert_eq!(week_start(d("2024-06-10")), d("2024-06-10"));
        // Sunday belongs to the preceding Monday's week.
        assert_eq!(week_start(d("2024-06-16")), d("2024-06-10"));
        for off in 0..60 {
            let ws = week_start(d("2024-01-01") + Duration::days(off));
            assert_eq!(ws.weekday(), Weekday::Mon);
        }
    }

    #[test]
    fn forward_paging_stops_two_weeks_out() {
        let today = d("2024-06-13");
        let this_week = week_start(today);
        let can = |ws| can_go_next_with_limit(ws, today, FORWARD_WEEKS_LIMIT);
        assert!(can(this_week));
        assert!(can(this_week + Duration::weeks(1)));
        assert!(!can(this_week + Duration::weeks(2)));
        // Three weeks ahead is never reachable at the default limit.
        assert!(!can(this_week + Duration::weeks(3)));
        // No lower bound: far in the past still pages forward.
        assert!(can(this_week - Duration::weeks(52)));
    }

    #[test]
    fn completion_percent_rounds_and_bounds() {
        assert_eq!(completion_percent(0, 0), 0);
        assert_eq!(completion_percent(2, 3), 67);
        assert_eq!(completion_percent(1, 3), 33);
        assert_eq!(completion_percent(3, 3), 100);
    }

    #[test]
    fn aggregate_partitions_by_exact_date() {
        let start = d("2024-06-10");
        let tasks = vec![
            task("a", "2024-06-10", true, 1),
            task("b", "2024-06-10", false, 0),
            task("c", "2024-06-12", true, 0),
            // Outside the week, must be dropped.
            task("d", "2024-06-17", false, 0),
        ];
        let comments = vec![CommentItem {
            id: "c1".to_string(),
            date: "2024-06-12".to_string(),
            teacher_id: "t1".to_string(),
            teacher_name: "Sato, Yuki".to_string(),
            body: "good progress".to_string(),
        }];

        let view = aggregate_week(start, &tasks, &comments);
        assert_eq!(view.days.len(), 7);
        assert_eq!(view.total_count, 3);
        assert_eq!(view.completed_count, 2);
        assert_eq!(view.percent, 67);

        let monday = &view.days[0];
        assert_eq!(monday.total_count, 2);
        assert_eq!(monday.percent, 50);
        // Sorted by display order within the day.
        assert_eq!(monday.tasks[0].id, "b");
        assert_eq!(monday.tasks[1].id, "a");

        let wednesday = &view.days[2];
        assert_eq!(wednesday.comments.len(), 1);
        assert_eq!(wednesday.percent, 100);

        let thursday = &view.days[3];
        assert_eq!(thursday.total_count, 0);
        assert_eq!(thursday.percent, 0);
    }

    #[test]
    fn toggle_twice_restores_percentages() {
        let start = d("2024-06-10");
        let mut tasks = vec![
            task("a", "2024-06-10", true, 0),
            task("b", "2024-06-10", false, 1),
            task("c", "2024-06-10", false, 2),
        ];
        let before = aggregate_week(start, &tasks, &[]);

        tasks[1].is_completed = true;
        let flipped = aggregate_week(start, &tasks, &[]);
        assert_eq!(flipped.days[0].percent, 67);

        tasks[1].is_completed = false;
        let after = aggregate_week(start, &tasks, &[]);
        assert_eq!(before.days[0].percent, after.days[0].percent);
        assert_eq!(before.percent, after.percent);
    }
}
