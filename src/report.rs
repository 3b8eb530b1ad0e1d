use std::fmt::Write;

use chrono::NaiveDate;

use crate::aggregate::{self, Roster};
use crate::evaluator;
use crate::models::{
    AdminOverview, DistributionBucket, Parent, Snapshot, Student, TaskRecommendation, TeacherStats,
};
use crate::recommend;

fn signed(percent: i64) -> String {
    if percent > 0 {
        format!("+{percent}%")
    } else {
        format!("{percent}%")
    }
}

fn distribution_line(buckets: &[DistributionBucket]) -> String {
    if buckets.iter().all(|b| b.count == 0) {
        return "not enough results yet".to_string();
    }
    buckets
        .iter()
        .map(|b| format!("{} {}%", b.category, b.percent))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn teacher_line(stats: &TeacherStats) -> String {
    let mut line = format!(
        "{} ({}): {} classes, {} enrolled, {} active, avg improvement {}",
        stats.name,
        stats.teacher_id,
        stats.num_classes,
        stats.enrolled_count,
        stats.num_students(),
        signed(stats.avg_improvement)
    );
    if let Some(top) = &stats.most_improved {
        let _ = write!(
            line,
            ", most improved {} ({})",
            top.nickname,
            signed(top.improvement)
        );
    }
    line
}

pub fn overview_text(overview: &AdminOverview) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{} teachers, {} classes, {} students enrolled ({} with a post-test)",
        overview.total_teachers,
        overview.total_classes,
        overview.enrolled_students,
        overview.active_students
    );
    let _ = writeln!(
        output,
        "Average pre-test {:.1}/20, post-test {:.1}/20, pass rate {}%",
        overview.avg_pre_test, overview.avg_post_test, overview.pass_rate
    );
    match &overview.most_improved_teacher {
        Some(top) => {
            let _ = writeln!(
                output,
                "Most improved teacher: {} ({})",
                top.name,
                signed(top.avg_improvement)
            );
        }
        None => {
            let _ = writeln!(output, "Most improved teacher: none yet");
        }
    }
    output
}

pub fn build_report(
    snapshot: &Snapshot,
    teacher_id: Option<&str>,
    generated_on: NaiveDate,
) -> String {
    let overview = aggregate::admin_overview(snapshot);
    let roster = Roster::build(snapshot);

    let mut output = String::new();
    let scope = teacher_id.unwrap_or("all teachers");

    let _ = writeln!(output, "# MathTatag Learning Report");
    let _ = writeln!(output, "Generated for {} on {}", scope, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = write!(output, "{}", overview_text(&overview));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Improvement Distribution");
    for bucket in &overview.improvement_distribution {
        let _ = writeln!(output, "- {}: {} students", bucket.label, bucket.count);
    }

    let teachers: Vec<&TeacherStats> = overview
        .teachers
        .iter()
        .filter(|t| teacher_id.map_or(true, |id| t.teacher_id == id))
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Teachers");
    if teachers.is_empty() {
        let _ = writeln!(output, "No teachers match this report.");
    }
    for stats in &teachers {
        let _ = writeln!(output, "- {}", teacher_line(stats));
    }

    for stats in &teachers {
        for class in snapshot
            .classes
            .iter()
            .filter(|c| c.teacher_id == stats.teacher_id)
        {
            let class_stats = aggregate::class_stats(class, &roster);
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "### {} ({} {})",
                class_stats.class_id, class_stats.school, class_stats.section
            );
            let _ = writeln!(
                output,
                "{} enrolled, {} active, avg improvement {}, avg post-test {}/20",
                class_stats.enrolled,
                class_stats.active,
                signed(class_stats.avg_improvement),
                class_stats.avg_post
            );
            let _ = writeln!(
                output,
                "- Pre-test: {}",
                distribution_line(&class_stats.pre_distribution)
            );
            let _ = writeln!(
                output,
                "- Post-test: {}",
                distribution_line(&class_stats.post_distribution)
            );

            let members = roster.members(&class.id);
            if members.is_empty() {
                let _ = writeln!(output, "No students enrolled.");
                continue;
            }
            let _ = writeln!(output);
            let _ = writeln!(output, "| Student | Pre | Post | Improvement |");
            let _ = writeln!(output, "|---|---|---|---|");
            for student in members {
                let eval = evaluator::evaluate_student(student);
                let improvement = if eval.active {
                    signed(eval.improvement)
                } else {
                    "-".to_string()
                };
                let _ = writeln!(
                    output,
                    "| {} | {} ({}) | {} ({}) | {} |",
                    eval.nickname,
                    eval.pre_total,
                    eval.pre_status,
                    eval.post_total,
                    eval.post_status,
                    improvement
                );
            }
        }
    }

    output
}

fn task_lines(output: &mut String, tasks: &[TaskRecommendation]) {
    if tasks.is_empty() {
        let _ = writeln!(output, "No tasks yet: the pre-test has not been taken.");
        return;
    }
    let _ = writeln!(
        output,
        "Tasks ({}% complete):",
        recommend::task_progress(tasks)
    );
    for task in tasks {
        let _ = writeln!(
            output,
            "- [{:?}] {} ({}): {}",
            task.priority,
            task.title,
            task.status.label(),
            task.details
        );
    }
}

pub fn student_card(student: &Student, parent: Option<&Parent>) -> String {
    let eval = evaluator::evaluate_student(student);
    let mut output = String::new();

    let _ = writeln!(output, "{} ({})", eval.nickname, eval.student_key);
    let _ = writeln!(output, "Class: {}", student.class_id);
    let _ = writeln!(output, "Pre-test: {}/20, {}", eval.pre_total, eval.pre_status);
    let _ = writeln!(output, "Post-test: {}/20, {}", eval.post_total, eval.post_status);
    if eval.active {
        let _ = writeln!(output, "Improvement: {}", signed(eval.improvement));
    }
    if let Some(parent) = parent {
        let _ = writeln!(output, "Parent: {} (code {})", parent.name, parent.auth_code);
    }
    task_lines(&mut output, &recommend::student_tasks(student, parent));
    output
}
