use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ids;
use crate::models::{
    Announcement, ClassRecord, IncomeBracket, Parent, Snapshot, Student, SubScore, Teacher,
};

/// Channel the `documents` trigger notifies with the changed path.
pub const CHANGE_CHANNEL: &str = "documents_changed";

/// Collections whose changes affect evaluation.
pub const SCORED_COLLECTIONS: [&str; 4] = ["Teachers", "Classes", "Students", "Parents"];

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn get_document(pool: &PgPool, path: &str) -> anyhow::Result<Option<Value>> {
    let row = sqlx::query("SELECT value FROM documents WHERE path = $1")
        .bind(path)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to read {path}"))?;

    Ok(row.map(|row| row.get("value")))
}

/// Direct children of `collection`, ordered by path.
pub async fn get_children(pool: &PgPool, collection: &str) -> anyhow::Result<Vec<(String, Value)>> {
    let rows = sqlx::query(
        r#"
        SELECT path, value FROM documents
        WHERE left(path, length($1) + 1) = $1 || '/'
          AND position('/' in substr(path, length($1) + 2)) = 0
        ORDER BY path
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list {collection}"))?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("path"), row.get("value")))
        .collect())
}

pub async fn set_document(pool: &PgPool, path: &str, value: &Value) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (path, value)
        VALUES ($1, $2)
        ON CONFLICT (path) DO UPDATE
        SET value = EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(path)
    .bind(Json(value))
    .execute(pool)
    .await
    .with_context(|| format!("failed to write {path}"))?;
    Ok(())
}

/// Merges the top-level keys of `value` into the document at `path`.
pub async fn update_document(pool: &PgPool, path: &str, value: &Value) -> anyhow::Result<()> {
    anyhow::ensure!(value.is_object(), "partial update of {path} needs an object");
    sqlx::query(
        r#"
        INSERT INTO documents (path, value)
        VALUES ($1, $2)
        ON CONFLICT (path) DO UPDATE
        SET value = documents.value || EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(path)
    .bind(Json(value))
    .execute(pool)
    .await
    .with_context(|| format!("failed to update {path}"))?;
    Ok(())
}

/// Deletes `path` and everything below it; returns the number of documents removed.
pub async fn remove_subtree(pool: &PgPool, path: &str) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "DELETE FROM documents WHERE path = $1 OR left(path, length($1) + 1) = $1 || '/'",
    )
    .bind(path)
    .execute(pool)
    .await
    .with_context(|| format!("failed to remove {path}"))?;
    Ok(result.rows_affected())
}

pub async fn subscribe(pool: &PgPool) -> anyhow::Result<PgListener> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("failed to open change listener")?;
    listener.listen(CHANGE_CHANNEL).await?;
    Ok(listener)
}

pub fn affects_scores(path: &str) -> bool {
    let collection = path.split('/').next().unwrap_or_default();
    SCORED_COLLECTIONS.contains(&collection)
}

fn decode_all<T: DeserializeOwned>(docs: Vec<(String, Value)>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|(path, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(%path, error = %err, "skipping malformed document");
                None
            }
        })
        .collect()
}

pub async fn load_collection<T: DeserializeOwned>(
    pool: &PgPool,
    collection: &str,
) -> anyhow::Result<Vec<T>> {
    Ok(decode_all(get_children(pool, collection).await?))
}

pub async fn load_document<T: DeserializeOwned>(
    pool: &PgPool,
    path: &str,
) -> anyhow::Result<Option<T>> {
    match get_document(pool, path).await? {
        Some(value) => {
            let record = serde_json::from_value(value)
                .with_context(|| format!("malformed document at {path}"))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

pub async fn load_snapshot(pool: &PgPool) -> anyhow::Result<Snapshot> {
    let teachers: Vec<Teacher> = load_collection(pool, "Teachers").await?;
    let classes: Vec<ClassRecord> = load_collection(pool, "Classes").await?;
    let students: Vec<Student> = load_collection(pool, "Students").await?;
    let parents: Vec<Parent> = load_collection(pool, "Parents").await?;

    info!(
        teachers = teachers.len(),
        classes = classes.len(),
        students = students.len(),
        parents = parents.len(),
        "loaded snapshot"
    );

    Ok(Snapshot::from_raw(teachers, classes, students, parents))
}

pub async fn load_announcements(
    pool: &PgPool,
    class_id: &str,
) -> anyhow::Result<Vec<Announcement>> {
    let all: Vec<Announcement> = load_collection(pool, "Announcements").await?;
    let mut announcements: Vec<Announcement> =
        all.into_iter().filter(|a| a.class_id == class_id).collect();
    announcements.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(announcements)
}

pub async fn find_parent_by_code(pool: &PgPool, auth_code: &str) -> anyhow::Result<Option<Parent>> {
    let row = sqlx::query(
        r#"
        SELECT path, value FROM documents
        WHERE left(path, 8) = 'Parents/' AND value->>'authCode' = $1
        ORDER BY path
        LIMIT 1
        "#,
    )
    .bind(auth_code.trim())
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|row| decode_all(vec![(row.get("path"), row.get("value"))]).pop()))
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let teachers = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Maria Santos",
            "maria.santos@mathtatag.ph",
            "San Jose",
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jose Ramos",
            "jose.ramos@mathtatag.ph",
            "Bagong Silang",
        ),
    ];

    let mut teacher_ids: Vec<String> = Vec::new();
    for (account_id, name, email, school) in &teachers {
        let teacher_id = ids::next_teacher_id(teacher_ids.iter().map(String::as_str))?;
        let teacher = Teacher {
            account_id: account_id.to_string(),
            teacher_id: teacher_id.clone(),
            name: name.to_string(),
            email: email.to_string(),
            school: school.to_string(),
            contact: "09170000000".to_string(),
        };
        set_document(
            pool,
            &format!("Teachers/{account_id}"),
            &serde_json::to_value(&teacher)?,
        )
        .await?;
        set_document(pool, &format!("Roles/Teacher/{account_id}"), &json!(true)).await?;
        teacher_ids.push(teacher_id);
    }

    // (nickname, auth code, income rank, pre, post)
    let rosters = [
        (
            0usize,
            "Mabini",
            vec![
                ("Bea", "QWE1234", 1u8, (2u32, 1u32), Some((6u32, 5u32))),
                ("Carlo", "RTY2345", 4, (5, 4), Some((8, 7))),
                ("Dana", "UIO3456", 2, (7, 6), Some((7, 6))),
                ("Eli", "PAS4567", 5, (3, 3), None),
            ],
        ),
        (
            1usize,
            "Rizal",
            vec![
                ("Faye", "DFG5678", 3, (1, 1), Some((5, 4))),
                ("Gabo", "HJK6789", 1, (9, 4), Some((9, 8))),
            ],
        ),
    ];

    for (teacher_idx, section, kids) in rosters {
        let school = teachers[teacher_idx].3;
        let class_id = ids::class_id(school, section, 2025)?;
        let mut student_ids: Vec<String> = Vec::new();

        for (nickname, code, income, pre, post) in kids {
            let student_id = ids::next_student_id(
                school,
                section,
                2025,
                student_ids.iter().map(String::as_str),
            )?;
            let parent_id = ids::parent_id(&student_id);
            let bracket = IncomeBracket::from_rank(income).unwrap_or_default();

            let parent = Parent {
                parent_id: parent_id.clone(),
                auth_code: code.to_string(),
                student_id: student_id.clone(),
                name: format!("{nickname}'s Parent"),
                household_income: bracket.label().to_string(),
                created_at: "2025-06-02T08:00:00Z".to_string(),
                ..Parent::default()
            };
            let student = Student {
                id: student_id.clone(),
                student_number: student_id.clone(),
                nickname: nickname.to_string(),
                class_id: class_id.clone(),
                pre_score: Some(SubScore::new(pre.0, pre.1)),
                post_score: Some(post.map(|(p, n)| SubScore::new(p, n)).unwrap_or_default()),
                parent_id: Some(parent_id.clone()),
            };

            set_document(
                pool,
                &format!("Parents/{parent_id}"),
                &serde_json::to_value(&parent)?,
            )
            .await?;
            set_document(
                pool,
                &format!("Students/{student_id}"),
                &serde_json::to_value(&student)?,
            )
            .await?;
            student_ids.push(student_id);
        }

        let class = ClassRecord {
            id: class_id.clone(),
            school: school.to_string(),
            section: section.to_string(),
            teacher_id: teacher_ids[teacher_idx].clone(),
            student_ids,
        };
        set_document(pool, &format!("Classes/{class_id}"), &serde_json::to_value(&class)?).await?;
    }

    Ok(())
}

fn section_value(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(0)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(Deserialize)]
    struct CsvRow {
        student_id: String,
        test: String,
        pattern: i64,
        numbers: i64,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut applied = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let field = match row.test.trim().to_ascii_lowercase().as_str() {
            "pre" => "preScore",
            "post" => "postScore",
            other => {
                warn!(student = %row.student_id, test = other, "unknown test kind, skipping row");
                continue;
            }
        };

        let path = format!("Students/{}", row.student_id.trim());
        if get_document(pool, &path).await?.is_none() {
            warn!(student = %row.student_id, "no such student, skipping row");
            continue;
        }

        let score = SubScore::new(section_value(row.pattern), section_value(row.numbers));
        update_document(pool, &path, &json!({ field: score })).await?;
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_record_collections_trigger_reevaluation() {
        assert!(affects_scores("Students/SJES-MABINI-2025-001"));
        assert!(affects_scores("Classes/SJES-MABINI-2025"));
        assert!(!affects_scores("Announcements/ANN-1"));
        assert!(!affects_scores("Roles/Teacher/uid"));
    }

    #[test]
    fn malformed_documents_are_skipped() {
        let docs = vec![
            ("Teachers/a".to_string(), json!({ "accountId": "a", "teacherId": "MTTG25-001" })),
            ("Teachers/b".to_string(), json!("garbage")),
        ];
        let teachers: Vec<Teacher> = decode_all(docs);
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].teacher_id, "MTTG25-001");
    }

    #[test]
    fn negative_csv_sections_clamp_to_zero() {
        assert_eq!(section_value(-2), 0);
        assert_eq!(section_value(7), 7);
    }
}
