use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregate;
mod db;
mod error;
mod evaluator;
mod ids;
mod models;
mod recommend;
mod records;
mod report;

#[derive(Parser)]
#[command(name = "mathtatag")]
#[command(about = "Score evaluation and reporting for MathTatag classes", long_about = None)]
struct Cli {
    /// Postgres connection string for the document store
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[arg(long, env = "MATHTATAG_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the document store schema
    InitDb,
    /// Load sample teachers, classes and students
    Seed,
    /// Apply test scores from a CSV file (student_id,test,pattern,numbers)
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print the admin overview and per-teacher statistics
    Summary,
    /// Write a markdown report
    Report {
        #[arg(long)]
        teacher_id: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Show one student's results and recommended tasks
    Student {
        #[arg(long)]
        id: String,
    },
    /// Register a teacher for an existing identity account
    RegisterTeacher {
        #[arg(long)]
        account_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        school: String,
        #[arg(long)]
        contact: String,
    },
    /// Remove a teacher and their role
    DeleteTeacher {
        #[arg(long)]
        account_id: String,
    },
    /// Change a teacher's name, email, school or contact
    EditTeacher {
        #[arg(long)]
        account_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        school: Option<String>,
        #[arg(long)]
        contact: Option<String>,
    },
    /// Create a class for a teacher
    AddClass {
        #[arg(long)]
        teacher_id: String,
        #[arg(long, default_value = "")]
        school: String,
        #[arg(long)]
        section: String,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Enroll a student and create the parent login
    AddStudent {
        #[arg(long)]
        class_id: String,
        #[arg(long)]
        nickname: String,
        #[arg(long)]
        year: Option<i32>,
    },
    /// Delete a class and every student enrolled in it
    DeleteClass {
        #[arg(long)]
        class_id: String,
    },
    /// Change a student's nickname or test scores
    EditStudent {
        #[arg(long)]
        id: String,
        #[arg(long)]
        nickname: Option<String>,
        #[arg(
            long,
            requires = "pre_numbers",
            value_parser = clap::value_parser!(u32).range(0..=10)
        )]
        pre_pattern: Option<u32>,
        #[arg(
            long,
            requires = "pre_pattern",
            value_parser = clap::value_parser!(u32).range(0..=10)
        )]
        pre_numbers: Option<u32>,
        #[arg(
            long,
            requires = "post_numbers",
            value_parser = clap::value_parser!(u32).range(0..=10)
        )]
        post_pattern: Option<u32>,
        #[arg(
            long,
            requires = "post_pattern",
            value_parser = clap::value_parser!(u32).range(0..=10)
        )]
        post_numbers: Option<u32>,
    },
    /// Delete a student and remove it from its class
    DeleteStudent {
        #[arg(long)]
        id: String,
    },
    /// Fill in a parent's name, contact and optional income bracket
    SetupParent {
        #[arg(long)]
        parent_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        contact: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        income: Option<u8>,
    },
    /// Set a household income bracket (1 = lowest, 5 = highest)
    SetIncome {
        #[arg(long)]
        parent_id: String,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rank: u8,
    },
    /// Move a recommended task to its next status
    AdvanceTask {
        #[arg(long)]
        parent_id: String,
        #[arg(long)]
        title: String,
    },
    /// Post an announcement to a class
    Announce {
        #[arg(long)]
        teacher_id: String,
        #[arg(long)]
        class_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
    },
    /// List announcements visible to a parent code
    Announcements {
        #[arg(long)]
        parent_code: String,
    },
    /// Re-print the summary whenever records change
    Watch,
}

fn print_summary(snapshot: &models::Snapshot) {
    let overview = aggregate::admin_overview(snapshot);
    print!("{}", report::overview_text(&overview));

    if overview.teachers.is_empty() {
        println!("No teachers registered.");
        return;
    }
    println!("Teachers:");
    for stats in &overview.teachers {
        println!("- {}", report::teacher_line(stats));
    }
}

async fn watch(pool: &PgPool) -> anyhow::Result<()> {
    let mut listener = db::subscribe(pool).await?;
    print_summary(&db::load_snapshot(pool).await?);

    loop {
        let notification = listener.recv().await?;
        let path = notification.payload();
        if !db::affects_scores(path) {
            debug!(path, "ignoring change");
            continue;
        }
        info!(path, "records changed, re-evaluating");
        println!();
        print_summary(&db::load_snapshot(pool).await?);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mathtatag=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let applied = db::import_csv(&pool, &csv).await?;
            println!("Applied {applied} scores from {}.", csv.display());
        }
        Commands::Summary => {
            let snapshot = db::load_snapshot(&pool).await?;
            print_summary(&snapshot);
        }
        Commands::Report { teacher_id, out } => {
            let snapshot = db::load_snapshot(&pool).await?;
            let report = report::build_report(
                &snapshot,
                teacher_id.as_deref(),
                chrono::Utc::now().date_naive(),
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Student { id } => {
            let snapshot = db::load_snapshot(&pool).await?;
            let student = snapshot
                .student(&id)
                .ok_or_else(|| error::Error::NotFound(format!("student {id}")))?;
            print!("{}", report::student_card(student, snapshot.parent_of(student)));
        }
        Commands::RegisterTeacher {
            account_id,
            name,
            email,
            school,
            contact,
        } => {
            let teacher = records::register_teacher(
                &pool,
                records::NewTeacher {
                    account_id: &account_id,
                    name: &name,
                    email: &email,
                    school: &school,
                    contact: &contact,
                },
            )
            .await?;
            println!("{} registered as {}.", teacher.name, teacher.teacher_id);
        }
        Commands::DeleteTeacher { account_id } => {
            if records::delete_teacher(&pool, &account_id).await? {
                println!("Teacher {account_id} deleted.");
            } else {
                println!("No teacher with account {account_id}.");
            }
        }
        Commands::EditTeacher {
            account_id,
            name,
            email,
            school,
            contact,
        } => {
            let teacher = records::update_teacher(
                &pool,
                &account_id,
                records::TeacherEdit {
                    name: name.as_deref(),
                    email: email.as_deref(),
                    school: school.as_deref(),
                    contact: contact.as_deref(),
                },
            )
            .await?;
            println!("Teacher {} updated.", teacher.teacher_id);
        }
        Commands::AddClass {
            teacher_id,
            school,
            section,
            year,
        } => {
            let year = year.unwrap_or_else(records::current_year);
            let class = records::add_class(&pool, &teacher_id, &school, &section, year).await?;
            println!("Class created: {}", class.id);
        }
        Commands::AddStudent {
            class_id,
            nickname,
            year,
        } => {
            let year = year.unwrap_or_else(records::current_year);
            let enrollment = records::add_student(&pool, &class_id, &nickname, year).await?;
            println!("Student ID: {}", enrollment.student_id);
            println!("Parent ID: {}", enrollment.parent_id);
            println!("Parent Auth Code: {}", enrollment.auth_code);
        }
        Commands::DeleteClass { class_id } => {
            let removed = records::delete_class(&pool, &class_id).await?;
            println!("Class {class_id} deleted with {removed} students.");
        }
        Commands::EditStudent {
            id,
            nickname,
            pre_pattern,
            pre_numbers,
            post_pattern,
            post_numbers,
        } => {
            let student = records::update_student(
                &pool,
                &id,
                records::StudentEdit {
                    nickname: nickname.as_deref(),
                    pre: pre_pattern.zip(pre_numbers),
                    post: post_pattern.zip(post_numbers),
                },
            )
            .await?;
            print!("{}", report::student_card(&student, None));
        }
        Commands::DeleteStudent { id } => {
            if records::delete_student(&pool, &id).await? {
                println!("Student {id} deleted.");
            } else {
                println!("No student with id {id}.");
            }
        }
        Commands::SetupParent {
            parent_id,
            name,
            contact,
            income,
        } => {
            let parent =
                records::update_parent_profile(&pool, &parent_id, &name, &contact, income).await?;
            println!(
                "Profile saved for {} ({}).",
                parent.name,
                models::IncomeBracket::from_label(&parent.household_income)
            );
        }
        Commands::SetIncome { parent_id, rank } => {
            let bracket = records::set_income(&pool, &parent_id, rank).await?;
            println!("Household income for {parent_id} set to {bracket}.");
        }
        Commands::AdvanceTask { parent_id, title } => {
            let status = records::advance_task(&pool, &parent_id, &title).await?;
            println!("\"{}\" is now {}.", title.trim(), status.label());
        }
        Commands::Announce {
            teacher_id,
            class_id,
            title,
            message,
        } => {
            let announcement =
                records::post_announcement(&pool, &teacher_id, &class_id, &title, &message)
                    .await?;
            println!(
                "Announcement {} sent to {}.",
                announcement.id, announcement.class_id
            );
        }
        Commands::Announcements { parent_code } => {
            let (parent, announcements) =
                records::announcements_for_code(&pool, &parent_code).await?;
            println!("Announcements for {}:", parent.name);
            if announcements.is_empty() {
                println!("No announcements yet.");
            }
            for announcement in announcements {
                println!(
                    "- {} ({}): {}",
                    announcement.title, announcement.date, announcement.message
                );
            }
        }
        Commands::Watch => watch(&pool).await?,
    }

    Ok(())
}
