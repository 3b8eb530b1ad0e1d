use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::evaluator::{self, PASS_THRESHOLD};
use crate::models::{
    AdminOverview, ClassRecord, ClassStats, MostImproved, Parent, Snapshot, Student, Teacher,
    TeacherStats, TestKind,
};

/// Keeps the first item for every key; later duplicates are dropped.
pub fn dedup_by_key<T, F>(items: Vec<T>, kind: &str, key: F) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        let k = key(&item);
        if seen.insert(k.clone()) {
            unique.push(item);
        } else {
            debug!(kind, key = %k, "dropping duplicate record");
        }
    }
    unique
}

impl Snapshot {
    pub fn from_raw(
        teachers: Vec<Teacher>,
        classes: Vec<ClassRecord>,
        students: Vec<Student>,
        parents: Vec<Parent>,
    ) -> Self {
        Self {
            teachers: dedup_by_key(teachers, "teacher", |t| t.account_id.clone()),
            classes: dedup_by_key(classes, "class", |c| c.id.clone()),
            students: dedup_by_key(students, "student", |s| s.key().to_string()),
            parents: dedup_by_key(parents, "parent", |p| p.parent_id.clone()),
        }
    }

    pub fn student(&self, key: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.key() == key)
    }

    /// The parent named by `parentId`, else the parent whose `studentId` matches.
    pub fn parent_of(&self, student: &Student) -> Option<&Parent> {
        student
            .parent_id
            .as_deref()
            .and_then(|parent_id| self.parents.iter().find(|p| p.parent_id == parent_id))
            .or_else(|| self.parents.iter().find(|p| p.student_id == student.key()))
    }
}

/// Students grouped under the class their `classId` names.
///
/// Join mismatches between `Student.classId` and `ClassRecord.studentIds`
/// are logged and left out.
#[derive(Debug)]
pub struct Roster<'a> {
    members: HashMap<&'a str, Vec<&'a Student>>,
}

impl<'a> Roster<'a> {
    pub fn build(snapshot: &'a Snapshot) -> Self {
        let class_ids: HashSet<&str> = snapshot.classes.iter().map(|c| c.id.as_str()).collect();
        let mut members: HashMap<&str, Vec<&Student>> = HashMap::new();

        for student in &snapshot.students {
            if class_ids.contains(student.class_id.as_str()) {
                members
                    .entry(student.class_id.as_str())
                    .or_default()
                    .push(student);
            } else {
                warn!(
                    student = student.key(),
                    class_id = %student.class_id,
                    "student references an unknown class"
                );
            }
        }

        for class in &snapshot.classes {
            for listed in &class.student_ids {
                match snapshot.student(listed) {
                    None => warn!(
                        class_id = %class.id,
                        student = %listed,
                        "class lists a student with no record"
                    ),
                    Some(student) if student.class_id != class.id => warn!(
                        class_id = %class.id,
                        student = %listed,
                        actual_class = %student.class_id,
                        "class lists a student enrolled elsewhere"
                    ),
                    Some(_) => {}
                }
            }
        }

        Self { members }
    }

    pub fn members(&self, class_id: &str) -> &[&'a Student] {
        self.members
            .get(class_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Highest improvement among active students; the earliest wins ties.
pub fn most_improved<'a, I>(students: I) -> Option<MostImproved>
where
    I: IntoIterator<Item = &'a Student>,
{
    let mut best: Option<(&Student, i64)> = None;
    for student in students.into_iter().filter(|s| evaluator::is_active(s)) {
        let improvement = evaluator::student_improvement(student);
        match best {
            Some((_, top)) if improvement <= top => {}
            _ => best = Some((student, improvement)),
        }
    }
    best.map(|(student, improvement)| MostImproved {
        student_key: student.key().to_string(),
        nickname: student.display_name().to_string(),
        improvement,
    })
}

/// Rounded percentage of students whose post-test total reaches the pass mark.
pub fn pass_rate(students: &[Student]) -> i64 {
    let unique = dedup_by_key(students.iter().collect::<Vec<_>>(), "student", |s| {
        s.key().to_string()
    });
    if unique.is_empty() {
        return 0;
    }
    let passed = unique
        .iter()
        .filter(|s| evaluator::total_for(s, TestKind::Post) >= PASS_THRESHOLD)
        .count();
    evaluator::round_half_away(passed as f64 / unique.len() as f64 * 100.0)
}

fn active_improvements(students: &[&Student]) -> Vec<i64> {
    students
        .iter()
        .filter(|s| evaluator::is_active(s))
        .map(|s| evaluator::student_improvement(s))
        .collect()
}

pub fn class_stats(class: &ClassRecord, roster: &Roster<'_>) -> ClassStats {
    let members = roster.members(&class.id);
    let improvements = active_improvements(members);
    let post_totals: Vec<i64> = members
        .iter()
        .filter(|s| evaluator::is_active(s))
        .map(|s| i64::from(evaluator::total_for(s, TestKind::Post)))
        .collect();

    ClassStats {
        class_id: class.id.clone(),
        school: class.school.clone(),
        section: class.section.clone(),
        teacher_id: class.teacher_id.clone(),
        enrolled: members.len(),
        active: improvements.len(),
        avg_improvement: evaluator::mean_rounded(&improvements),
        avg_post: evaluator::mean_rounded(&post_totals),
        most_improved: most_improved(members.iter().copied()),
        pre_distribution: evaluator::performance_distribution(
            members.iter().copied(),
            TestKind::Pre,
        ),
        post_distribution: evaluator::performance_distribution(
            members.iter().copied(),
            TestKind::Post,
        ),
    }
}

pub fn teacher_students<'a>(
    teacher: &Teacher,
    snapshot: &'a Snapshot,
    roster: &Roster<'a>,
) -> Vec<&'a Student> {
    snapshot
        .classes
        .iter()
        .filter(|c| c.teacher_id == teacher.teacher_id)
        .flat_map(|c| roster.members(&c.id).iter().copied())
        .collect()
}

pub fn teacher_stats(teacher: &Teacher, snapshot: &Snapshot, roster: &Roster<'_>) -> TeacherStats {
    let num_classes = snapshot
        .classes
        .iter()
        .filter(|c| c.teacher_id == teacher.teacher_id)
        .count();
    let enrolled = teacher_students(teacher, snapshot, roster);
    let improvements = active_improvements(&enrolled);

    TeacherStats {
        account_id: teacher.account_id.clone(),
        teacher_id: teacher.teacher_id.clone(),
        name: teacher.name.clone(),
        num_classes,
        enrolled_count: enrolled.len(),
        active_count: improvements.len(),
        avg_improvement: evaluator::mean_rounded(&improvements),
        most_improved: most_improved(enrolled.iter().copied()),
    }
}

fn average_taken(students: &[Student], test: TestKind) -> f64 {
    let totals: Vec<u32> = students
        .iter()
        .filter(|s| evaluator::test_status(evaluator::score_for(s, test)).is_taken())
        .map(|s| evaluator::total_for(s, test))
        .collect();
    if totals.is_empty() {
        return 0.0;
    }
    let mean = totals.iter().sum::<u32>() as f64 / totals.len() as f64;
    (mean * 10.0).round() / 10.0
}

pub fn admin_overview(snapshot: &Snapshot) -> AdminOverview {
    let roster = Roster::build(snapshot);
    let teachers: Vec<TeacherStats> = snapshot
        .teachers
        .iter()
        .map(|t| teacher_stats(t, snapshot, &roster))
        .collect();

    let enrolled: Vec<&Student> = snapshot
        .classes
        .iter()
        .flat_map(|c| roster.members(&c.id).iter().copied())
        .collect();
    let active_students = enrolled.iter().filter(|s| evaluator::is_active(s)).count();

    let mut most_improved_teacher: Option<&TeacherStats> = None;
    for stats in &teachers {
        match most_improved_teacher {
            Some(top) if stats.avg_improvement <= top.avg_improvement => {}
            _ => most_improved_teacher = Some(stats),
        }
    }

    AdminOverview {
        total_teachers: snapshot.teachers.len(),
        total_classes: snapshot.classes.len(),
        enrolled_students: enrolled.len(),
        active_students,
        avg_pre_test: average_taken(&snapshot.students, TestKind::Pre),
        avg_post_test: average_taken(&snapshot.students, TestKind::Post),
        pass_rate: pass_rate(&snapshot.students),
        most_improved_teacher: most_improved_teacher.cloned(),
        improvement_distribution: evaluator::improvement_distribution(enrolled.iter().copied()),
        teachers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubScore;

    fn teacher(account_id: &str, teacher_id: &str, name: &str) -> Teacher {
        Teacher {
            account_id: account_id.to_string(),
            teacher_id: teacher_id.to_string(),
            name: name.to_string(),
            ..Teacher::default()
        }
    }

    fn class(id: &str, teacher_id: &str, student_ids: &[&str]) -> ClassRecord {
        ClassRecord {
            id: id.to_string(),
            school: "San Jose Elementary".to_string(),
            section: "Mabini".to_string(),
            teacher_id: teacher_id.to_string(),
            student_ids: student_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn student(id: &str, class_id: &str, pre: (u32, u32), post: (u32, u32)) -> Student {
        Student {
            id: id.to_string(),
            student_number: id.to_string(),
            nickname: format!("kid {id}"),
            class_id: class_id.to_string(),
            pre_score: Some(SubScore::new(pre.0, pre.1)),
            post_score: Some(SubScore::new(post.0, post.1)),
            parent_id: None,
        }
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot::from_raw(
            vec![
                teacher("uid-a", "MTTG25-001", "Ana"),
                teacher("uid-b", "MTTG25-002", "Ben"),
            ],
            vec![
                class("C1", "MTTG25-001", &["S1", "S2", "S3"]),
                class("C2", "MTTG25-001", &["S4"]),
                class("C3", "MTTG25-002", &["S5", "GHOST"]),
            ],
            vec![
                student("S1", "C1", (2, 1), (6, 5)),
                student("S2", "C1", (5, 5), (5, 5)),
                student("S3", "C1", (4, 4), (0, 0)),
                student("S4", "C2", (5, 5), (8, 7)),
                student("S5", "C3", (5, 5), (4, 4)),
                student("S6", "NOWHERE", (1, 1), (9, 9)),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn teacher_counts_split_enrolled_and_active() {
        let snapshot = sample_snapshot();
        let roster = Roster::build(&snapshot);
        let stats = teacher_stats(&snapshot.teachers[0], &snapshot, &roster);

        assert_eq!(stats.num_classes, 2);
        assert_eq!(stats.enrolled_count, 4);
        assert_eq!(stats.active_count, 3);
        assert_eq!(stats.num_students(), 3);
        // (267 + 0 + 50) / 3 = 105.67
        assert_eq!(stats.avg_improvement, 106);
        let top = stats.most_improved.unwrap();
        assert_eq!(top.student_key, "S1");
        assert_eq!(top.improvement, 267);
    }

    #[test]
    fn teacher_without_active_students_averages_zero() {
        let snapshot = Snapshot::from_raw(
            vec![teacher("uid-a", "MTTG25-001", "Ana")],
            vec![class("C1", "MTTG25-001", &["S1"])],
            vec![student("S1", "C1", (3, 3), (0, 0))],
            Vec::new(),
        );
        let roster = Roster::build(&snapshot);
        let stats = teacher_stats(&snapshot.teachers[0], &snapshot, &roster);
        assert_eq!(stats.enrolled_count, 1);
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.avg_improvement, 0);
        assert!(stats.most_improved.is_none());
    }

    #[test]
    fn duplicate_students_count_once() {
        let mut copy = student("S1", "C1", (2, 1), (6, 5));
        copy.nickname = "stale".to_string();
        let snapshot = Snapshot::from_raw(
            vec![
                teacher("uid-a", "MTTG25-001", "Ana"),
                teacher("uid-a", "MTTG25-001", "Ana (again)"),
            ],
            vec![class("C1", "MTTG25-001", &["S1"])],
            vec![student("S1", "C1", (2, 1), (6, 5)), copy],
            Vec::new(),
        );
        assert_eq!(snapshot.teachers.len(), 1);
        assert_eq!(snapshot.teachers[0].name, "Ana");
        assert_eq!(snapshot.students.len(), 1);
        assert_eq!(snapshot.students[0].nickname, "kid S1");

        let roster = Roster::build(&snapshot);
        let stats = teacher_stats(&snapshot.teachers[0], &snapshot, &roster);
        assert_eq!(stats.num_students(), 1);
    }

    #[test]
    fn most_improved_prefers_first_on_ties() {
        let students = vec![
            student("A", "C1", (5, 5), (10, 10)),
            student("B", "C1", (5, 5), (10, 10)),
            student("C", "C1", (1, 1), (0, 0)),
        ];
        let top = most_improved(&students).unwrap();
        assert_eq!(top.student_key, "A");
        assert_eq!(top.improvement, 100);
    }

    #[test]
    fn pass_rate_uses_all_students() {
        let snapshot = sample_snapshot();
        // S1 11, S2 10, S3 0, S4 15, S5 8, S6 18 -> 5 of 6
        assert_eq!(pass_rate(&snapshot.students), 83);
        assert_eq!(pass_rate(&[]), 0);

        let doubled = vec![
            student("S1", "C1", (1, 1), (3, 3)),
            student("S1", "C1", (1, 1), (3, 3)),
            student("S2", "C1", (1, 1), (4, 4)),
        ];
        assert_eq!(pass_rate(&doubled), 50);
    }

    #[test]
    fn orphans_are_left_out_of_teacher_aggregates() {
        let snapshot = sample_snapshot();
        let roster = Roster::build(&snapshot);
        assert_eq!(roster.members("C3").len(), 1);
        assert!(roster.members("NOWHERE").is_empty());

        let overview = admin_overview(&snapshot);
        assert_eq!(overview.enrolled_students, 5);
        assert_eq!(overview.active_students, 4);
    }

    #[test]
    fn student_listed_in_another_class_counts_where_enrolled() {
        let snapshot = Snapshot::from_raw(
            vec![teacher("uid-a", "MTTG25-001", "Ana")],
            vec![
                class("A", "MTTG25-001", &["S1", "S2"]),
                class("B", "MTTG25-001", &[]),
            ],
            vec![
                student("S1", "A", (2, 2), (5, 5)),
                student("S2", "B", (2, 2), (6, 6)),
            ],
            Vec::new(),
        );
        let roster = Roster::build(&snapshot);
        let in_a: Vec<&str> = roster.members("A").iter().map(|s| s.key()).collect();
        let in_b: Vec<&str> = roster.members("B").iter().map(|s| s.key()).collect();
        assert_eq!(in_a, vec!["S1"]);
        assert_eq!(in_b, vec!["S2"]);

        let stats = teacher_stats(&snapshot.teachers[0], &snapshot, &roster);
        assert_eq!(stats.enrolled_count, 2);
    }

    #[test]
    fn parent_lookup_falls_back_to_student_link() {
        let parent = |parent_id: &str, student_id: &str| Parent {
            parent_id: parent_id.to_string(),
            student_id: student_id.to_string(),
            ..Parent::default()
        };
        let mut linked = student("S1", "C1", (1, 1), (2, 2));
        linked.parent_id = Some("parent-S1".to_string());
        let mut dangling = student("S2", "C1", (1, 1), (2, 2));
        dangling.parent_id = Some("parent-gone".to_string());
        let unlinked = student("S3", "C1", (1, 1), (2, 2));

        let snapshot = Snapshot::from_raw(
            Vec::new(),
            vec![class("C1", "MTTG25-001", &["S1", "S2", "S3"])],
            vec![linked, dangling, unlinked],
            vec![
                parent("parent-S1", "S1"),
                parent("p-two", "S2"),
                parent("p-three", "S3"),
            ],
        );
        let found = |idx: usize| {
            snapshot
                .parent_of(&snapshot.students[idx])
                .map(|p| p.parent_id.as_str())
        };
        assert_eq!(found(0), Some("parent-S1"));
        assert_eq!(found(1), Some("p-two"));
        assert_eq!(found(2), Some("p-three"));
    }

    #[test]
    fn class_stats_mirror_dashboard_card() {
        let snapshot = sample_snapshot();
        let roster = Roster::build(&snapshot);
        let stats = class_stats(&snapshot.classes[0], &roster);

        assert_eq!(stats.enrolled, 3);
        assert_eq!(stats.active, 2);
        // (267 + 0) / 2
        assert_eq!(stats.avg_improvement, 134);
        // (11 + 10) / 2
        assert_eq!(stats.avg_post, 11);
        let post_taken: usize = stats.post_distribution.iter().map(|b| b.count).sum();
        assert_eq!(post_taken, 2);
    }

    #[test]
    fn overview_picks_most_improved_teacher() {
        let snapshot = sample_snapshot();
        let overview = admin_overview(&snapshot);

        assert_eq!(overview.total_teachers, 2);
        assert_eq!(overview.total_classes, 3);
        assert_eq!(overview.pass_rate, 83);
        let top = overview.most_improved_teacher.unwrap();
        assert_eq!(top.teacher_id, "MTTG25-001");
        // pre totals 3, 10, 8, 10, 10, 2 -> 43 / 6
        assert_eq!(overview.avg_pre_test, 7.2);
        // post totals taken: 11, 10, 15, 8, 18 -> 62 / 5
        assert_eq!(overview.avg_post_test, 12.4);
    }

    #[test]
    fn overview_of_empty_snapshot_is_zeroed() {
        let overview = admin_overview(&Snapshot::default());
        assert_eq!(overview.total_teachers, 0);
        assert_eq!(overview.pass_rate, 0);
        assert_eq!(overview.avg_pre_test, 0.0);
        assert!(overview.most_improved_teacher.is_none());
    }
}
