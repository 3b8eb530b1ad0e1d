use std::collections::HashSet;

use chrono::{Datelike, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::db;
use crate::error::Error;
use crate::ids;
use crate::models::{
    Announcement, ClassRecord, IncomeBracket, Parent, Student, SubScore, TaskStatus, Teacher,
    SECTION_MAX,
};
use crate::recommend;

pub struct NewTeacher<'a> {
    pub account_id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub school: &'a str,
    pub contact: &'a str,
}

#[derive(Debug)]
pub struct Enrollment {
    pub student_id: String,
    pub parent_id: String,
    pub auth_code: String,
}

fn require(value: &str, field: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

pub fn current_year() -> i32 {
    Utc::now().year()
}

pub async fn register_teacher(pool: &PgPool, new: NewTeacher<'_>) -> anyhow::Result<Teacher> {
    require(new.account_id, "account id")?;
    require(new.name, "name")?;
    require(new.email, "email")?;
    require(new.school, "school")?;
    require(new.contact, "contact")?;

    let path = format!("Teachers/{}", new.account_id);
    if db::get_document(pool, &path).await?.is_some() {
        return Err(Error::InvalidInput(format!(
            "account {} is already a teacher",
            new.account_id
        ))
        .into());
    }

    let existing: Vec<Teacher> = db::load_collection(pool, "Teachers").await?;
    let teacher_id = ids::next_teacher_id(existing.iter().map(|t| t.teacher_id.as_str()))?;

    let teacher = Teacher {
        account_id: new.account_id.to_string(),
        teacher_id,
        name: new.name.trim().to_string(),
        email: new.email.trim().to_string(),
        school: new.school.trim().to_string(),
        contact: new.contact.trim().to_string(),
    };
    db::set_document(pool, &path, &serde_json::to_value(&teacher)?).await?;
    db::set_document(pool, &format!("Roles/Teacher/{}", new.account_id), &json!(true)).await?;

    info!(
        teacher_id = %teacher.teacher_id,
        account_id = %teacher.account_id,
        "registered teacher"
    );
    Ok(teacher)
}

/// Removes the teacher record and role; returns false when nothing was there.
pub async fn delete_teacher(pool: &PgPool, account_id: &str) -> anyhow::Result<bool> {
    require(account_id, "account id")?;
    let removed = db::remove_subtree(pool, &format!("Teachers/{account_id}")).await?;
    db::remove_subtree(pool, &format!("Roles/Teacher/{account_id}")).await?;
    Ok(removed > 0)
}

pub async fn add_class(
    pool: &PgPool,
    teacher_id: &str,
    school: &str,
    section: &str,
    year: i32,
) -> anyhow::Result<ClassRecord> {
    let teachers: Vec<Teacher> = db::load_collection(pool, "Teachers").await?;
    if !teachers.iter().any(|t| t.teacher_id == teacher_id) {
        return Err(Error::NotFound(format!("teacher {teacher_id}")).into());
    }

    let school = if school.trim().is_empty() {
        "Unknown School"
    } else {
        school.trim()
    };
    let id = ids::class_id(school, section, year)?;
    let path = format!("Classes/{id}");
    if db::get_document(pool, &path).await?.is_some() {
        return Err(Error::InvalidInput(format!("class {id} already exists")).into());
    }

    let class = ClassRecord {
        id,
        school: school.to_string(),
        section: section.trim().to_string(),
        teacher_id: teacher_id.to_string(),
        student_ids: Vec::new(),
    };
    db::set_document(pool, &path, &serde_json::to_value(&class)?).await?;

    info!(class_id = %class.id, teacher_id, "created class");
    Ok(class)
}

pub async fn add_student(
    pool: &PgPool,
    class_id: &str,
    nickname: &str,
    year: i32,
) -> anyhow::Result<Enrollment> {
    require(nickname, "nickname")?;
    let class_path = format!("Classes/{class_id}");
    let mut class: ClassRecord = db::load_document(pool, &class_path)
        .await?
        .ok_or_else(|| Error::NotFound(format!("class {class_id}")))?;

    let students: Vec<Student> = db::load_collection(pool, "Students").await?;
    let student_id = ids::next_student_id(
        &class.school,
        &class.section,
        year,
        students
            .iter()
            .filter(|s| s.class_id == class.id)
            .map(|s| s.key()),
    )?;

    let parents: Vec<Parent> = db::load_collection(pool, "Parents").await?;
    let codes: HashSet<String> = parents.into_iter().map(|p| p.auth_code).collect();
    let auth_code = {
        let mut rng = rand::thread_rng();
        ids::unique_auth_code(&mut rng, &codes)?
    };

    let parent_id = ids::parent_id(&student_id);
    let parent = Parent {
        parent_id: parent_id.clone(),
        auth_code: auth_code.clone(),
        student_id: student_id.clone(),
        name: format!("{}'s Parent", nickname.trim()),
        created_at: Utc::now().to_rfc3339(),
        ..Parent::default()
    };
    db::set_document(
        pool,
        &format!("Parents/{parent_id}"),
        &serde_json::to_value(&parent)?,
    )
    .await?;

    let student = Student {
        id: student_id.clone(),
        student_number: student_id.clone(),
        nickname: nickname.trim().to_string(),
        class_id: class.id.clone(),
        pre_score: Some(SubScore::default()),
        post_score: Some(SubScore::default()),
        parent_id: Some(parent_id.clone()),
    };
    db::set_document(
        pool,
        &format!("Students/{student_id}"),
        &serde_json::to_value(&student)?,
    )
    .await?;

    if !class.student_ids.contains(&student_id) {
        class.student_ids.push(student_id.clone());
    }
    db::update_document(pool, &class_path, &json!({ "studentIds": class.student_ids })).await?;

    info!(student_id = %student_id, class_id, "enrolled student");
    Ok(Enrollment {
        student_id,
        parent_id,
        auth_code,
    })
}

pub async fn set_income(
    pool: &PgPool,
    parent_id: &str,
    rank: u8,
) -> anyhow::Result<IncomeBracket> {
    let bracket = IncomeBracket::from_rank(rank)
        .ok_or_else(|| Error::InvalidInput(format!("income rank {rank} is not between 1 and 5")))?;
    let path = format!("Parents/{parent_id}");
    if db::get_document(pool, &path).await?.is_none() {
        return Err(Error::NotFound(format!("parent {parent_id}")).into());
    }
    db::update_document(pool, &path, &json!({ "householdIncome": bracket.label() })).await?;
    Ok(bracket)
}

/// Moves one recommended task to its next status and stores it on the parent.
pub async fn advance_task(
    pool: &PgPool,
    parent_id: &str,
    title: &str,
) -> anyhow::Result<TaskStatus> {
    let path = format!("Parents/{parent_id}");
    let mut parent: Parent = db::load_document(pool, &path)
        .await?
        .ok_or_else(|| Error::NotFound(format!("parent {parent_id}")))?;
    let student: Student = db::load_document(pool, &format!("Students/{}", parent.student_id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("student {}", parent.student_id)))?;

    let tasks = recommend::student_tasks(&student, Some(&parent));
    let task = tasks
        .iter()
        .find(|t| t.title == title.trim())
        .ok_or_else(|| Error::InvalidInput(format!("\"{title}\" is not a current task")))?;

    let next = task.status.advance();
    if next == task.status {
        warn!(parent_id, title, "task already done");
    }
    parent.task_status.insert(task.title.to_string(), next);
    db::update_document(pool, &path, &json!({ "taskStatus": parent.task_status })).await?;
    Ok(next)
}

/// Changes to a teacher profile; `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct TeacherEdit<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub school: Option<&'a str>,
    pub contact: Option<&'a str>,
}

impl TeacherEdit<'_> {
    fn apply(&self, teacher: &mut Teacher) -> Result<(), Error> {
        let fields = [
            (self.name, "name", &mut teacher.name),
            (self.email, "email", &mut teacher.email),
            (self.school, "school", &mut teacher.school),
            (self.contact, "contact", &mut teacher.contact),
        ];
        if fields.iter().all(|(value, _, _)| value.is_none()) {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }
        for (value, field, slot) in fields {
            if let Some(value) = value {
                require(value, field)?;
                *slot = value.trim().to_string();
            }
        }
        Ok(())
    }
}

pub async fn update_teacher(
    pool: &PgPool,
    account_id: &str,
    edit: TeacherEdit<'_>,
) -> anyhow::Result<Teacher> {
    let path = format!("Teachers/{account_id}");
    let mut teacher: Teacher = db::load_document(pool, &path)
        .await?
        .ok_or_else(|| Error::NotFound(format!("teacher account {account_id}")))?;
    edit.apply(&mut teacher)?;
    db::set_document(pool, &path, &serde_json::to_value(&teacher)?).await?;

    info!(teacher_id = %teacher.teacher_id, account_id, "updated teacher");
    Ok(teacher)
}

/// Keys of the students whose `classId` is `class_id`.
fn students_in_class(students: &[Student], class_id: &str) -> Vec<String> {
    students
        .iter()
        .filter(|s| s.class_id == class_id)
        .map(|s| s.key().to_string())
        .collect()
}

/// Deletes a class and every student enrolled in it; returns the students removed.
pub async fn delete_class(pool: &PgPool, class_id: &str) -> anyhow::Result<usize> {
    require(class_id, "class id")?;
    let path = format!("Classes/{class_id}");
    if db::get_document(pool, &path).await?.is_none() {
        return Err(Error::NotFound(format!("class {class_id}")).into());
    }
    db::remove_subtree(pool, &path).await?;

    let students: Vec<Student> = db::load_collection(pool, "Students").await?;
    let doomed = students_in_class(&students, class_id);
    for student_id in &doomed {
        db::remove_subtree(pool, &format!("Students/{student_id}")).await?;
    }

    info!(class_id, students = doomed.len(), "deleted class");
    Ok(doomed.len())
}

/// `ids` without `student_id`, or `None` when it was not listed.
fn without_student(ids: &[String], student_id: &str) -> Option<Vec<String>> {
    if !ids.iter().any(|id| id == student_id) {
        return None;
    }
    Some(ids.iter().filter(|id| *id != student_id).cloned().collect())
}

/// Deletes a student and drops it from every class roster that lists it.
pub async fn delete_student(pool: &PgPool, student_id: &str) -> anyhow::Result<bool> {
    require(student_id, "student id")?;
    let removed = db::remove_subtree(pool, &format!("Students/{student_id}")).await?;

    let classes: Vec<ClassRecord> = db::load_collection(pool, "Classes").await?;
    for class in &classes {
        if let Some(remaining) = without_student(&class.student_ids, student_id) {
            db::update_document(
                pool,
                &format!("Classes/{}", class.id),
                &json!({ "studentIds": remaining }),
            )
            .await?;
            info!(class_id = %class.id, student_id, "removed student from class");
        }
    }

    if removed == 0 {
        warn!(student_id, "no student record to delete");
    }
    Ok(removed > 0)
}

/// Changes to a student; scores are given as `(pattern, numbers)`.
#[derive(Debug, Default)]
pub struct StudentEdit<'a> {
    pub nickname: Option<&'a str>,
    pub pre: Option<(u32, u32)>,
    pub post: Option<(u32, u32)>,
}

fn edited_score(sections: (u32, u32), test: &str) -> Result<SubScore, Error> {
    let (pattern, numbers) = sections;
    if pattern > SECTION_MAX || numbers > SECTION_MAX {
        return Err(Error::InvalidInput(format!(
            "{test} sections must be between 0 and {SECTION_MAX}"
        )));
    }
    Ok(SubScore::new(pattern, numbers))
}

impl StudentEdit<'_> {
    fn apply(&self, student: &mut Student) -> Result<(), Error> {
        if self.nickname.is_none() && self.pre.is_none() && self.post.is_none() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }
        let pre = self.pre.map(|s| edited_score(s, "pre-test")).transpose()?;
        let post = self.post.map(|s| edited_score(s, "post-test")).transpose()?;
        if let Some(nickname) = self.nickname {
            require(nickname, "nickname")?;
            student.nickname = nickname.trim().to_string();
        }
        if pre.is_some() {
            student.pre_score = pre;
        }
        if post.is_some() {
            student.post_score = post;
        }
        Ok(())
    }
}

pub async fn update_student(
    pool: &PgPool,
    student_id: &str,
    edit: StudentEdit<'_>,
) -> anyhow::Result<Student> {
    let path = format!("Students/{student_id}");
    let mut student: Student = db::load_document(pool, &path)
        .await?
        .ok_or_else(|| Error::NotFound(format!("student {student_id}")))?;
    edit.apply(&mut student)?;
    db::set_document(pool, &path, &serde_json::to_value(&student)?).await?;

    info!(student_id, "updated student");
    Ok(student)
}

/// Fields written by the parent profile setup.
fn profile_fields(name: &str, contact: &str, income: Option<u8>) -> Result<Value, Error> {
    require(name, "name")?;
    require(contact, "contact")?;
    let mut fields = json!({
        "name": name.trim(),
        "contact": contact.trim(),
    });
    if let Some(rank) = income {
        let bracket = IncomeBracket::from_rank(rank).ok_or_else(|| {
            Error::InvalidInput(format!("income rank {rank} is not between 1 and 5"))
        })?;
        fields["householdIncome"] = json!(bracket.label());
    }
    Ok(fields)
}

pub async fn update_parent_profile(
    pool: &PgPool,
    parent_id: &str,
    name: &str,
    contact: &str,
    income: Option<u8>,
) -> anyhow::Result<Parent> {
    let fields = profile_fields(name, contact, income)?;
    let path = format!("Parents/{parent_id}");
    if db::get_document(pool, &path).await?.is_none() {
        return Err(Error::NotFound(format!("parent {parent_id}")).into());
    }
    db::update_document(pool, &path, &fields).await?;

    let parent: Parent = db::load_document(pool, &path)
        .await?
        .ok_or_else(|| Error::NotFound(format!("parent {parent_id}")))?;
    info!(parent_id, "updated parent profile");
    Ok(parent)
}

pub async fn post_announcement(
    pool: &PgPool,
    teacher_id: &str,
    class_id: &str,
    title: &str,
    message: &str,
) -> anyhow::Result<Announcement> {
    require(title, "title")?;
    require(message, "message")?;
    require(teacher_id, "teacher id")?;
    if db::get_document(pool, &format!("Classes/{class_id}")).await?.is_none() {
        return Err(Error::NotFound(format!("class {class_id}")).into());
    }

    let now = Utc::now();
    let announcement = Announcement {
        id: format!("ANN-{}", now.timestamp_millis()),
        class_id: class_id.to_string(),
        title: title.trim().to_string(),
        message: message.trim().to_string(),
        date: now.to_rfc3339(),
        teacher_id: teacher_id.to_string(),
    };
    db::set_document(
        pool,
        &format!("Announcements/{}", announcement.id),
        &serde_json::to_value(&announcement)?,
    )
    .await?;
    Ok(announcement)
}

/// Announcements for the class of the student a parent code belongs to.
pub async fn announcements_for_code(
    pool: &PgPool,
    auth_code: &str,
) -> anyhow::Result<(Parent, Vec<Announcement>)> {
    let parent = db::find_parent_by_code(pool, auth_code)
        .await?
        .ok_or_else(|| Error::NotFound("no parent with that code".to_string()))?;
    let student: Option<Student> =
        db::load_document(pool, &format!("Students/{}", parent.student_id)).await?;

    let announcements = match student {
        Some(student) if !student.class_id.is_empty() => {
            db::load_announcements(pool, &student.class_id).await?
        }
        _ => Vec::new(),
    };
    Ok((parent, announcements))
}
