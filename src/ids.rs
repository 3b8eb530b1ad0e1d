//! Readable identifiers for teachers, classes, students and parents.

use std::collections::HashSet;

use rand::Rng;

use crate::error::{Error, Result};

pub const TEACHER_ID_PREFIX: &str = "MTTG25-";
pub const MAX_SEQUENCE: u32 = 999;
pub const MAX_AUTH_CODE_ATTEMPTS: usize = 10_000;

/// Parses the trailing three-digit sequence of `id` after `prefix`.
fn parse_sequence(id: &str, prefix: &str) -> Option<u32> {
    let digits = id.strip_prefix(prefix)?;
    if digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

fn format_sequence(prefix: &str, seq: u32, kind: &'static str) -> Result<String> {
    if seq > MAX_SEQUENCE {
        return Err(Error::IdentifierSpaceExhausted { kind });
    }
    Ok(format!("{prefix}{seq:03}"))
}

/// Next teacher id after the highest `MTTG25-NNN` already issued.
pub fn next_teacher_id<'a, I>(existing: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .filter_map(|id| parse_sequence(id, TEACHER_ID_PREFIX))
        .max()
        .unwrap_or(0);
    format_sequence(TEACHER_ID_PREFIX, max + 1, "teacher id")
}

/// First letter of every word plus `ES`, upper-cased.
pub fn school_abbreviation(school: &str) -> String {
    let school = if school.trim().is_empty() {
        "Unknown School"
    } else {
        school
    };
    let initials: String = school
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .collect();
    format!("{initials}ES").to_uppercase()
}

pub fn class_id(school: &str, section: &str, year: i32) -> Result<String> {
    let section = section.trim();
    if section.is_empty() {
        return Err(Error::InvalidInput("section name is required".to_string()));
    }
    Ok(format!(
        "{}-{}-{}",
        school_abbreviation(school),
        section.to_uppercase(),
        year
    ))
}

/// Next student id for a class and year.
///
/// `class_student_ids` are the ids of students already in the class. The
/// sequence is one past the highest one carrying the same prefix, and never
/// lower than the class head-count plus one.
pub fn next_student_id<'a, I>(
    school: &str,
    section: &str,
    year: i32,
    class_student_ids: I,
) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format!("{}-", class_id(school, section, year)?);
    let mut count = 0u32;
    let mut max = 0u32;
    for id in class_student_ids {
        count += 1;
        if let Some(seq) = parse_sequence(id, &prefix) {
            max = max.max(seq);
        }
    }
    format_sequence(&prefix, max.max(count) + 1, "student id")
}

pub fn parent_id(student_id: &str) -> String {
    format!("parent-{student_id}")
}

pub fn random_auth_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let letters: String = (0..3)
        .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
        .collect();
    let digits: u32 = rng.gen_range(1000..=9999);
    format!("{letters}{digits}")
}

/// Draws codes until one is not in `existing`, up to `MAX_AUTH_CODE_ATTEMPTS`.
pub fn unique_auth_code<R: Rng + ?Sized>(
    rng: &mut R,
    existing: &HashSet<String>,
) -> Result<String> {
    unique_auth_code_within(rng, existing, MAX_AUTH_CODE_ATTEMPTS)
}

fn unique_auth_code_within<R: Rng + ?Sized>(
    rng: &mut R,
    existing: &HashSet<String>,
    attempts: usize,
) -> Result<String> {
    for _ in 0..attempts {
        let code = random_auth_code(rng);
        if !existing.contains(&code) {
            return Ok(code);
        }
    }
    Err(Error::IdentifierSpaceExhausted { kind: "parent auth code" })
}
