use crate::models::{
    DistributionBucket, ImprovementBucket, ProficiencyCategory, Student, StudentEvaluation,
    SubScore, TestKind, TEST_MAX,
};

/// Lowest post-test total that counts as passing.
pub const PASS_THRESHOLD: u32 = 7;

/// Fewer taken tests than this leave a distribution empty.
pub const MIN_DISTRIBUTION_SAMPLE: usize = 2;

pub fn classify(total: i64, max: i64, pattern: i64, numbers: i64) -> ProficiencyCategory {
    if pattern == 0 && numbers == 0 {
        return ProficiencyCategory::NotYetTaken;
    }
    if max <= 0 || total < 0 {
        return ProficiencyCategory::NotYetTaken;
    }

    // percent < bound  <=>  total * 100 < bound * max, widened so it cannot overflow
    let scaled = i128::from(total) * 100;
    let max = i128::from(max);
    if scaled < 25 * max {
        ProficiencyCategory::Intervention
    } else if scaled < 50 * max {
        ProficiencyCategory::ForConsolidation
    } else if scaled < 75 * max {
        ProficiencyCategory::ForEnhancement
    } else if scaled < 85 * max {
        ProficiencyCategory::Proficient
    } else {
        ProficiencyCategory::HighlyProficient
    }
}

pub fn test_status(score: Option<&SubScore>) -> ProficiencyCategory {
    match score {
        Some(score) => classify(
            i64::from(score.total()),
            i64::from(TEST_MAX),
            i64::from(score.pattern),
            i64::from(score.numbers),
        ),
        None => ProficiencyCategory::NotYetTaken,
    }
}

/// Percentage change from `pre` to `post`, rounded half away from zero.
///
/// A zero baseline reports 100 when anything was gained and 0 otherwise.
pub fn improvement_percent(pre: i64, post: i64) -> i64 {
    if pre == 0 {
        return if post > 0 { 100 } else { 0 };
    }
    round_half_away((post as f64 - pre as f64) / pre as f64 * 100.0)
}

pub fn round_half_away(value: f64) -> i64 {
    if value.is_finite() {
        value.round() as i64
    } else {
        0
    }
}

pub fn mean_rounded(values: &[i64]) -> i64 {
    if values.is_empty() {
        return 0;
    }
    let sum: i128 = values.iter().map(|v| i128::from(*v)).sum();
    round_half_away(sum as f64 / values.len() as f64)
}

pub fn score_for(student: &Student, test: TestKind) -> Option<&SubScore> {
    match test {
        TestKind::Pre => student.pre_score.as_ref(),
        TestKind::Post => student.post_score.as_ref(),
    }
}

pub fn total_for(student: &Student, test: TestKind) -> u32 {
    score_for(student, test).map(SubScore::total).unwrap_or(0)
}

/// A student with a recorded, non-placeholder post-test.
pub fn is_active(student: &Student) -> bool {
    student
        .post_score
        .map(|score| !score.is_placeholder())
        .unwrap_or(false)
}

pub fn student_improvement(student: &Student) -> i64 {
    improvement_percent(
        i64::from(total_for(student, TestKind::Pre)),
        i64::from(total_for(student, TestKind::Post)),
    )
}

pub fn evaluate_student(student: &Student) -> StudentEvaluation {
    StudentEvaluation {
        student_key: student.key().to_string(),
        nickname: student.display_name().to_string(),
        pre_total: total_for(student, TestKind::Pre),
        post_total: total_for(student, TestKind::Post),
        pre_status: test_status(student.pre_score.as_ref()),
        post_status: test_status(student.post_score.as_ref()),
        improvement: student_improvement(student),
        active: is_active(student),
    }
}

/// Share of taken tests per graded category.
///
/// Untaken tests are skipped; with fewer than `MIN_DISTRIBUTION_SAMPLE`
/// taken tests every bucket reports zero.
pub fn performance_distribution<'a, I>(students: I, test: TestKind) -> Vec<DistributionBucket>
where
    I: IntoIterator<Item = &'a Student>,
{
    let mut counts = [0usize; 5];
    for student in students {
        let status = test_status(score_for(student, test));
        if let Some(idx) = ProficiencyCategory::GRADED
            .iter()
            .position(|category| *category == status)
        {
            counts[idx] += 1;
        }
    }

    let sum: usize = counts.iter().sum();
    ProficiencyCategory::GRADED
        .iter()
        .zip(counts)
        .map(|(category, count)| DistributionBucket {
            category: *category,
            count: if sum < MIN_DISTRIBUTION_SAMPLE { 0 } else { count },
            percent: if sum < MIN_DISTRIBUTION_SAMPLE {
                0
            } else {
                round_half_away(count as f64 / sum as f64 * 100.0)
            },
        })
        .collect()
}

pub const IMPROVEMENT_BUCKETS: [&str; 7] = [
    "Declined",
    "0-10%",
    "11-25%",
    "26-50%",
    "51-75%",
    "76-100%",
    "Above 100%",
];

pub fn improvement_bucket(improvement: i64) -> &'static str {
    let idx = match improvement {
        i64::MIN..=-1 => 0,
        0..=10 => 1,
        11..=25 => 2,
        26..=50 => 3,
        51..=75 => 4,
        76..=100 => 5,
        _ => 6,
    };
    IMPROVEMENT_BUCKETS[idx]
}

/// Counts active students by improvement band.
pub fn improvement_distribution<'a, I>(students: I) -> Vec<ImprovementBucket>
where
    I: IntoIterator<Item = &'a Student>,
{
    let mut buckets: Vec<ImprovementBucket> = IMPROVEMENT_BUCKETS
        .iter()
        .map(|label| ImprovementBucket {
            label: *label,
            count: 0,
        })
        .collect();

    for student in students.into_iter().filter(|s| is_active(s)) {
        let label = improvement_bucket(student_improvement(student));
        if let Some(bucket) = buckets.iter_mut().find(|b| b.label == label) {
            bucket.count += 1;
        }
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(pre: Option<(u32, u32)>, post: Option<(u32, u32)>) -> Student {
        Student {
            id: "SJES-MABINI-2025-001".to_string(),
            nickname: "Bea".to_string(),
            class_id: "SJES-MABINI-2025".to_string(),
            pre_score: pre.map(|(p, n)| SubScore::new(p, n)),
            post_score: post.map(|(p, n)| SubScore::new(p, n)),
            ..Student::default()
        }
    }

    #[test]
    fn classify_follows_fixed_thresholds() {
        assert_eq!(classify(0, 0, 0, 0), ProficiencyCategory::NotYetTaken);
        assert_eq!(classify(20, 20, 10, 10), ProficiencyCategory::HighlyProficient);
        assert_eq!(classify(4, 20, 2, 2), ProficiencyCategory::Intervention);
        assert_eq!(classify(5, 20, 3, 2), ProficiencyCategory::ForConsolidation);
        assert_eq!(classify(9, 20, 5, 4), ProficiencyCategory::ForConsolidation);
        assert_eq!(classify(10, 20, 5, 5), ProficiencyCategory::ForEnhancement);
        assert_eq!(classify(14, 20, 7, 7), ProficiencyCategory::ForEnhancement);
        assert_eq!(classify(15, 20, 8, 7), ProficiencyCategory::Proficient);
        assert_eq!(classify(16, 20, 8, 8), ProficiencyCategory::Proficient);
        assert_eq!(classify(17, 20, 9, 8), ProficiencyCategory::HighlyProficient);
    }

    #[test]
    fn classify_guards_degenerate_input() {
        assert_eq!(classify(5, 0, 3, 2), ProficiencyCategory::NotYetTaken);
        assert_eq!(classify(-1, 20, 3, 2), ProficiencyCategory::NotYetTaken);
        assert_eq!(classify(0, 20, 0, 0), ProficiencyCategory::NotYetTaken);
    }

    #[test]
    fn classify_handles_extreme_totals() {
        assert_eq!(
            classify(i64::MAX / 50, 20, 1, 1),
            ProficiencyCategory::HighlyProficient
        );
        assert_eq!(
            classify(i64::MAX, i64::MAX, 10, 10),
            ProficiencyCategory::HighlyProficient
        );
        assert_eq!(classify(1, i64::MAX, 1, 0), ProficiencyCategory::Intervention);
    }

    #[test]
    fn improvement_and_means_survive_extreme_values() {
        assert!(improvement_percent(1, i64::MIN) < 0);
        assert!(improvement_percent(-1, i64::MAX) < 0);
        assert_eq!(improvement_percent(i64::MAX, i64::MAX), 0);
        assert_eq!(mean_rounded(&[i64::MAX, i64::MAX]), i64::MAX);
    }

    #[test]
    fn improvement_handles_zero_baseline() {
        assert_eq!(improvement_percent(0, 0), 0);
        assert_eq!(improvement_percent(0, 5), 100);
        assert_eq!(improvement_percent(10, 15), 50);
        assert_eq!(improvement_percent(10, 5), -50);
        assert_eq!(improvement_percent(7, 7), 0);
    }

    #[test]
    fn improvement_rounds_half_away_from_zero() {
        // 1/8 = 12.5%
        assert_eq!(improvement_percent(8, 9), 13);
        assert_eq!(improvement_percent(8, 7), -13);
    }

    #[test]
    fn end_to_end_student_evaluation() {
        let eval = evaluate_student(&student(Some((2, 1)), Some((6, 5))));
        assert_eq!(eval.pre_total, 3);
        assert_eq!(eval.post_total, 11);
        assert_eq!(eval.pre_status, ProficiencyCategory::Intervention);
        assert_eq!(eval.post_status, ProficiencyCategory::ForEnhancement);
        assert_eq!(eval.improvement, 267);
        assert!(eval.active);
    }

    #[test]
    fn placeholder_post_test_is_not_active() {
        assert!(!is_active(&student(Some((3, 3)), Some((0, 0)))));
        assert!(!is_active(&student(Some((3, 3)), None)));
        assert!(is_active(&student(None, Some((0, 1)))));
    }

    #[test]
    fn distribution_needs_two_taken_tests() {
        let one = vec![student(Some((5, 5)), None)];
        let buckets = performance_distribution(&one, TestKind::Pre);
        assert_eq!(buckets.len(), 5);
        assert!(buckets.iter().all(|b| b.percent == 0 && b.count == 0));
    }

    #[test]
    fn distribution_skips_untaken_tests() {
        let students = vec![
            student(Some((1, 1)), None),
            student(Some((9, 9)), None),
            student(Some((0, 0)), None),
            student(None, None),
        ];
        let buckets = performance_distribution(&students, TestKind::Pre);
        assert_eq!(buckets[0].category, ProficiencyCategory::Intervention);
        assert_eq!(buckets[0].percent, 50);
        assert_eq!(buckets[4].category, ProficiencyCategory::HighlyProficient);
        assert_eq!(buckets[4].percent, 50);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 2);
    }

    #[test]
    fn improvement_bands_cover_regressions_and_large_gains() {
        assert_eq!(improvement_bucket(-4), "Declined");
        assert_eq!(improvement_bucket(0), "0-10%");
        assert_eq!(improvement_bucket(50), "26-50%");
        assert_eq!(improvement_bucket(267), "Above 100%");

        let students = vec![
            student(Some((2, 1)), Some((6, 5))),
            student(Some((5, 5)), Some((5, 6))),
            student(Some((5, 5)), None),
        ];
        let buckets = improvement_distribution(&students);
        let counted: usize = buckets.iter().map(|b| b.count).sum();
        assert_eq!(counted, 2);
        assert_eq!(buckets[1].count, 1);
        assert_eq!(buckets[6].count, 1);
    }
}
