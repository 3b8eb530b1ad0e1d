use crate::evaluator;
use crate::models::{
    IncomeBracket, Parent, Priority, Student, TaskCategory, TaskRecommendation, TaskStatus,
};

fn task(
    title: &'static str,
    category: TaskCategory,
    priority: Priority,
    details: &'static str,
) -> TaskRecommendation {
    TaskRecommendation {
        title,
        category,
        priority,
        details,
        status: TaskStatus::NotDone,
    }
}

fn pattern_task(pattern: u32) -> TaskRecommendation {
    if pattern < 5 {
        task(
            "Basic Pattern Recognition",
            TaskCategory::Pattern,
            Priority::High,
            "Practice identifying simple patterns in sequences. Start with basic shapes and colors.",
        )
    } else if pattern < 8 {
        task(
            "Intermediate Pattern Practice",
            TaskCategory::Pattern,
            Priority::Medium,
            "Work on more complex patterns and sequences. Include number patterns.",
        )
    } else {
        task(
            "Advanced Pattern Challenges",
            TaskCategory::Pattern,
            Priority::Low,
            "Tackle complex pattern recognition and prediction exercises.",
        )
    }
}

fn numbers_task(numbers: u32) -> TaskRecommendation {
    if numbers < 5 {
        task(
            "Basic Number Operations",
            TaskCategory::Numbers,
            Priority::High,
            "Practice basic addition and subtraction with visual aids.",
        )
    } else if numbers < 8 {
        task(
            "Intermediate Number Work",
            TaskCategory::Numbers,
            Priority::Medium,
            "Practice mental math and quick calculations.",
        )
    } else {
        task(
            "Advanced Number Challenges",
            TaskCategory::Numbers,
            Priority::Low,
            "Complex problem-solving with numbers and word problems.",
        )
    }
}

fn income_task(income: IncomeBracket) -> TaskRecommendation {
    if income.rank() >= 4 {
        task(
            "Technology-Enhanced Learning",
            TaskCategory::Technology,
            Priority::Medium,
            "Use educational apps and online resources for interactive learning.",
        )
    } else {
        task(
            "Low-Cost Learning Activities",
            TaskCategory::Practical,
            Priority::High,
            "Use household items and free resources for hands-on learning.",
        )
    }
}

/// Accumulates every rule that applies, then orders by priority.
///
/// The sort is stable, so tasks of equal priority keep rule order.
pub fn recommend(pattern: u32, numbers: u32, income: IncomeBracket) -> Vec<TaskRecommendation> {
    let mut tasks = vec![pattern_task(pattern), numbers_task(numbers), income_task(income)];

    if pattern.abs_diff(numbers) > 3 {
        tasks.push(task(
            "Balanced Skill Development",
            TaskCategory::Mixed,
            Priority::High,
            "Focus on the weaker area while maintaining strength in the stronger area.",
        ));
    }

    if pattern.saturating_add(numbers) < 8 {
        tasks.push(task(
            "Foundation Building",
            TaskCategory::Remedial,
            Priority::High,
            "Build basic mathematical concepts and confidence through simple activities.",
        ));
    }

    tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
    tasks
}

/// Tasks for a student's household, driven by the pre-test.
///
/// An untaken pre-test yields no tasks. Stored statuses are applied by title.
pub fn student_tasks(student: &Student, parent: Option<&Parent>) -> Vec<TaskRecommendation> {
    let Some(pre) = student.pre_score.filter(|score| !score.is_placeholder()) else {
        return Vec::new();
    };
    let income = parent
        .map(|p| IncomeBracket::from_label(&p.household_income))
        .unwrap_or_default();

    let mut tasks = recommend(pre.pattern, pre.numbers, income);
    if let Some(parent) = parent {
        for task in &mut tasks {
            if let Some(status) = parent.task_status.get(task.title) {
                task.status = *status;
            }
        }
    }
    tasks
}

/// Rounded share of tasks marked done.
pub fn task_progress(tasks: &[TaskRecommendation]) -> i64 {
    if tasks.is_empty() {
        return 0;
    }
    let done = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .count();
    evaluator::round_half_away(done as f64 / tasks.len() as f64 * 100.0)
}

impl TaskStatus {
    pub fn advance(self) -> Self {
        match self {
            TaskStatus::NotDone => TaskStatus::Ongoing,
            TaskStatus::Ongoing | TaskStatus::Done => TaskStatus::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubScore;

    fn titles(tasks: &[TaskRecommendation]) -> Vec<&'static str> {
        tasks.iter().map(|t| t.title).collect()
    }

    #[test]
    fn low_scores_and_low_income_fire_remedial_and_practical() {
        let tasks = recommend(2, 2, IncomeBracket::from_label("₱10,000 and below"));
        assert_eq!(
            titles(&tasks),
            vec![
                "Basic Pattern Recognition",
                "Basic Number Operations",
                "Low-Cost Learning Activities",
                "Foundation Building",
            ]
        );
        assert!(tasks
            .iter()
            .any(|t| t.category == TaskCategory::Remedial && t.priority == Priority::High));
        assert!(tasks
            .iter()
            .any(|t| t.category == TaskCategory::Practical && t.priority == Priority::High));
    }

    #[test]
    fn priority_order_keeps_rule_order_within_ties() {
        let tasks = recommend(9, 2, IncomeBracket::Above25k);
        assert_eq!(
            titles(&tasks),
            vec![
                "Basic Number Operations",
                "Balanced Skill Development",
                "Technology-Enhanced Learning",
                "Advanced Pattern Challenges",
            ]
        );
    }

    #[test]
    fn strong_balanced_student_gets_three_tasks() {
        let tasks = recommend(9, 9, IncomeBracket::From20kTo25k);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].priority, Priority::Medium);
        assert_eq!(tasks[0].category, TaskCategory::Technology);
        assert!(tasks[1..].iter().all(|t| t.priority == Priority::Low));
    }

    #[test]
    fn task_count_stays_between_three_and_five() {
        for pattern in 0..=10 {
            for numbers in 0..=10 {
                for income in IncomeBracket::ALL {
                    let tasks = recommend(pattern, numbers, income);
                    assert!((3..=5).contains(&tasks.len()));
                    assert!(tasks.windows(2).all(|w| w[0].priority >= w[1].priority));
                }
            }
        }
    }

    #[test]
    fn oversized_sections_still_recommend() {
        let tasks = recommend(u32::MAX, 1, IncomeBracket::UpTo10k);
        assert_eq!(tasks.len(), 4);
        assert!(!titles(&tasks).contains(&"Foundation Building"));
        assert!(titles(&tasks).contains(&"Balanced Skill Development"));
        assert_eq!(recommend(u32::MAX, u32::MAX, IncomeBracket::Above25k).len(), 3);
    }

    #[test]
    fn recommend_is_idempotent() {
        let first = recommend(6, 1, IncomeBracket::From15kTo20k);
        let second = recommend(6, 1, IncomeBracket::From15kTo20k);
        assert_eq!(first, second);
    }

    #[test]
    fn student_tasks_need_a_taken_pretest() {
        let mut student = Student {
            id: "S1".to_string(),
            pre_score: Some(SubScore::new(0, 0)),
            ..Student::default()
        };
        assert!(student_tasks(&student, None).is_empty());

        student.pre_score = None;
        assert!(student_tasks(&student, None).is_empty());
    }

    #[test]
    fn student_tasks_apply_income_and_saved_status() {
        let student = Student {
            id: "S1".to_string(),
            pre_score: Some(SubScore::new(6, 6)),
            ..Student::default()
        };
        let mut parent = Parent {
            parent_id: "parent-S1".to_string(),
            household_income: IncomeBracket::Above25k.label().to_string(),
            ..Parent::default()
        };
        parent
            .task_status
            .insert("Intermediate Number Work".to_string(), TaskStatus::Done);

        let tasks = student_tasks(&student, Some(&parent));
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.priority == Priority::Medium));
        assert_eq!(tasks[2].title, "Technology-Enhanced Learning");
        assert_eq!(tasks[1].status, TaskStatus::Done);
        assert_eq!(task_progress(&tasks), 33);
    }

    #[test]
    fn progress_of_no_tasks_is_zero() {
        assert_eq!(task_progress(&[]), 0);
    }

    #[test]
    fn status_only_moves_forward() {
        assert_eq!(TaskStatus::NotDone.advance(), TaskStatus::Ongoing);
        assert_eq!(TaskStatus::Ongoing.advance(), TaskStatus::Done);
        assert_eq!(TaskStatus::Done.advance(), TaskStatus::Done);
    }
}
