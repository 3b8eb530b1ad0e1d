use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Maximum correct answers on one test section.
pub const SECTION_MAX: u32 = 10;
/// Maximum total on one test (pattern + numbers).
pub const TEST_MAX: u32 = 2 * SECTION_MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubScore {
    #[serde(default, deserialize_with = "lenient_section")]
    pub pattern: u32,
    #[serde(default, deserialize_with = "lenient_section")]
    pub numbers: u32,
}

impl SubScore {
    pub fn new(pattern: u32, numbers: u32) -> Self {
        Self {
            pattern: pattern.min(SECTION_MAX),
            numbers: numbers.min(SECTION_MAX),
        }
    }

    pub fn total(&self) -> u32 {
        self.pattern + self.numbers
    }

    /// Both sections at zero is how an untaken test is stored.
    pub fn is_placeholder(&self) -> bool {
        self.pattern == 0 && self.numbers == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub student_number: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub class_id: String,
    #[serde(
        default,
        deserialize_with = "lenient_subscore",
        skip_serializing_if = "Option::is_none"
    )]
    pub pre_score: Option<SubScore>,
    #[serde(
        default,
        deserialize_with = "lenient_subscore",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_score: Option<SubScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Student {
    /// Stable identity used for deduplication.
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.student_number
        } else {
            &self.id
        }
    }

    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            self.key()
        } else {
            &self.nickname
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub teacher_id: String,
    #[serde(default, deserialize_with = "lenient_id_list")]
    pub student_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub teacher_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub auth_code: String,
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub household_income: String,
    #[serde(default)]
    pub task_status: BTreeMap<String, TaskStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "announcementid", default)]
    pub id: String,
    #[serde(rename = "classid", default)]
    pub class_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub date: String,
    #[serde(rename = "teacherid", default)]
    pub teacher_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProficiencyCategory {
    NotYetTaken,
    Intervention,
    ForConsolidation,
    ForEnhancement,
    Proficient,
    HighlyProficient,
}

impl ProficiencyCategory {
    /// Categories a taken test can land in, lowest first.
    pub const GRADED: [ProficiencyCategory; 5] = [
        ProficiencyCategory::Intervention,
        ProficiencyCategory::ForConsolidation,
        ProficiencyCategory::ForEnhancement,
        ProficiencyCategory::Proficient,
        ProficiencyCategory::HighlyProficient,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ProficiencyCategory::NotYetTaken => "Not yet taken",
            ProficiencyCategory::Intervention => "Intervention",
            ProficiencyCategory::ForConsolidation => "For Consolidation",
            ProficiencyCategory::ForEnhancement => "For Enhancement",
            ProficiencyCategory::Proficient => "Proficient",
            ProficiencyCategory::HighlyProficient => "Highly Proficient",
        }
    }

    pub fn is_taken(self) -> bool {
        self != ProficiencyCategory::NotYetTaken
    }
}

impl fmt::Display for ProficiencyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Household monthly income, lowest bracket first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum IncomeBracket {
    #[default]
    UpTo10k,
    From10kTo15k,
    From15kTo20k,
    From20kTo25k,
    Above25k,
}

impl IncomeBracket {
    pub const ALL: [IncomeBracket; 5] = [
        IncomeBracket::UpTo10k,
        IncomeBracket::From10kTo15k,
        IncomeBracket::From15kTo20k,
        IncomeBracket::From20kTo25k,
        IncomeBracket::Above25k,
    ];

    /// 1-indexed rank, 5 being the highest income.
    pub fn rank(self) -> u8 {
        match self {
            IncomeBracket::UpTo10k => 1,
            IncomeBracket::From10kTo15k => 2,
            IncomeBracket::From15kTo20k => 3,
            IncomeBracket::From20kTo25k => 4,
            IncomeBracket::Above25k => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IncomeBracket::UpTo10k => "₱10,000 and below",
            IncomeBracket::From10kTo15k => "₱10,001–15,000",
            IncomeBracket::From15kTo20k => "₱15,001–20,000",
            IncomeBracket::From20kTo25k => "₱20,001–25,000",
            IncomeBracket::Above25k => "₱25,001 and above",
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|bracket| bracket.rank() == rank)
    }

    /// Unknown or empty labels fall back to the lowest bracket.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|bracket| bracket.label() == label)
            .unwrap_or_default()
    }
}

impl fmt::Display for IncomeBracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Pattern,
    Numbers,
    Technology,
    Practical,
    Mixed,
    Remedial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    NotDone,
    Ongoing,
    Done,
}

impl TaskStatus {
    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::NotDone => "Not Done",
            TaskStatus::Ongoing => "Ongoing",
            TaskStatus::Done => "Done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecommendation {
    pub title: &'static str,
    pub category: TaskCategory,
    pub priority: Priority,
    pub details: &'static str,
    pub status: TaskStatus,
}

/// Which of the two assessments a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    Pre,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentEvaluation {
    pub student_key: String,
    pub nickname: String,
    pub pre_total: u32,
    pub post_total: u32,
    pub pre_status: ProficiencyCategory,
    pub post_status: ProficiencyCategory,
    pub improvement: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MostImproved {
    pub student_key: String,
    pub nickname: String,
    pub improvement: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionBucket {
    pub category: ProficiencyCategory,
    pub count: usize,
    pub percent: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImprovementBucket {
    pub label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeacherStats {
    pub account_id: String,
    pub teacher_id: String,
    pub name: String,
    pub num_classes: usize,
    pub enrolled_count: usize,
    pub active_count: usize,
    pub avg_improvement: i64,
    pub most_improved: Option<MostImproved>,
}

impl TeacherStats {
    /// Students counted toward averages.
    pub fn num_students(&self) -> usize {
        self.active_count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassStats {
    pub class_id: String,
    pub school: String,
    pub section: String,
    pub teacher_id: String,
    pub enrolled: usize,
    pub active: usize,
    pub avg_improvement: i64,
    pub avg_post: i64,
    pub most_improved: Option<MostImproved>,
    pub pre_distribution: Vec<DistributionBucket>,
    pub post_distribution: Vec<DistributionBucket>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminOverview {
    pub total_teachers: usize,
    pub total_classes: usize,
    pub enrolled_students: usize,
    pub active_students: usize,
    pub avg_pre_test: f64,
    pub avg_post_test: f64,
    pub pass_rate: i64,
    pub most_improved_teacher: Option<TeacherStats>,
    pub improvement_distribution: Vec<ImprovementBucket>,
    pub teachers: Vec<TeacherStats>,
}

/// Deduplicated view of the document tree at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub teachers: Vec<Teacher>,
    pub classes: Vec<ClassRecord>,
    pub students: Vec<Student>,
    pub parents: Vec<Parent>,
}

/// Coerces a stored section score into `0..=SECTION_MAX`.
///
/// Absent, null, non-numeric and negative values read as zero; numeric
/// strings are accepted and fractions are truncated.
pub fn normalize_section(value: Option<&Value>) -> u32 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() && v > 0.0 => (v.trunc() as u32).min(SECTION_MAX),
        _ => 0,
    }
}

fn lenient_section<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(normalize_section(value.as_ref()))
}

fn lenient_subscore<'de, D>(deserializer: D) -> Result<Option<SubScore>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => Some(SubScore {
            pattern: normalize_section(map.get("pattern")),
            numbers: normalize_section(map.get("numbers")),
        }),
        _ => None,
    })
}

// Sparse arrays come back from the store as objects keyed by index.
fn lenient_id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let items: Vec<Value> = match value {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by_key(|(index, _)| index.parse::<usize>().unwrap_or(usize::MAX));
            entries.into_iter().map(|(_, v)| v).collect()
        }
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        })
        .collect())
}
