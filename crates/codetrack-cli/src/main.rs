use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codetrack_core::{total_problems, Platform, StudentProfile};
use codetrack_storage::{InMemoryActivityLog, JsonFileStudentStore, StudentStore};
use codetrack_sync::{maybe_build_scheduler, RefreshEngine, SyncConfig};
use codetrack_web::AppState;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "codetrack-cli")]
#[command(about = "Student coding activity tracker command-line interface")]
struct Cli {
    /// Roster file; created on first write.
    #[arg(long, default_value = "./students.json")]
    data_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add a student to the roster.
    AddStudent {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        department: String,
        #[arg(long, default_value_t = 1)]
        year: u32,
        #[arg(long)]
        leetcode: Option<String>,
        #[arg(long)]
        codeforces: Option<String>,
        #[arg(long)]
        atcoder: Option<String>,
        #[arg(long)]
        github: Option<String>,
    },
    /// Scrape every linked platform for one student, or for everyone.
    Refresh {
        #[arg(long)]
        student: Option<Uuid>,
    },
    /// Re-scrape a single platform for one student.
    Retry {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        platform: String,
    },
    /// Print the roster ranked by total problems solved.
    Leaderboard,
    /// Run the JSON API server.
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

async fn build_engine(data_file: &PathBuf) -> Result<Arc<RefreshEngine>> {
    let store = Arc::new(JsonFileStudentStore::open(data_file.clone()).await?);
    let activity = Arc::new(InMemoryActivityLog::new());
    let config = SyncConfig::from_env();
    let ctx = config.build_context()?;
    Ok(Arc::new(RefreshEngine::new(store, activity, ctx)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AddStudent {
            name,
            email,
            department,
            year,
            leetcode,
            codeforces,
            atcoder,
            github,
        } => {
            let store = JsonFileStudentStore::open(cli.data_file.clone()).await?;
            let mut profile = StudentProfile::new(name, email);
            profile.department = department;
            profile.year = year;
            let urls = [
                (Platform::LeetCode, leetcode),
                (Platform::Codeforces, codeforces),
                (Platform::AtCoder, atcoder),
                (Platform::GitHub, github),
            ];
            for (platform, url) in urls {
                if let Some(url) = url {
                    profile.set_platform_url(platform, url);
                }
            }
            let id = profile.id;
            let linked = profile.platform_urls.len();
            store.insert(profile).await?;
            println!("added student {id} with {linked} linked platform(s)");
        }
        Commands::Refresh { student } => {
            let engine = build_engine(&cli.data_file).await?;
            match student {
                Some(id) => {
                    let outcome = engine.refresh_student(id).await?;
                    println!("refresh {} for student {id}:", outcome.run_id);
                    for (platform, status) in &outcome.statuses {
                        println!("  {}: {status}", platform.display_name());
                    }
                }
                None => {
                    let summary = engine.refresh_all_students().await?;
                    println!(
                        "refresh {} complete: students={} completed={} failed={}",
                        summary.run_id,
                        summary.students,
                        summary.platforms_completed,
                        summary.platforms_failed
                    );
                }
            }
        }
        Commands::Retry { student, platform } => {
            let Some(platform) = Platform::parse(&platform) else {
                anyhow::bail!("unknown platform {platform}");
            };
            let engine = build_engine(&cli.data_file).await?;
            let outcome = engine.retry_platform(student, platform).await?;
            let status = outcome
                .statuses
                .get(&platform)
                .map(|s| s.as_str())
                .unwrap_or("not_started");
            println!("retry {} for {}: {status}", outcome.run_id, platform.display_name());
        }
        Commands::Leaderboard => {
            let store = JsonFileStudentStore::open(cli.data_file.clone()).await?;
            let mut students = store.list().await?;
            students.sort_by_key(|s| std::cmp::Reverse(total_problems(&s.platform_data)));
            for (rank, student) in students.iter().enumerate() {
                println!(
                    "{:>3}. {:<24} {:>5} problems",
                    rank + 1,
                    student.name,
                    total_problems(&student.platform_data)
                );
            }
        }
        Commands::Serve { port } => {
            let engine = build_engine(&cli.data_file).await?;
            let config = SyncConfig::from_env();
            let _scheduler = maybe_build_scheduler(engine.clone(), &config).await?;
            println!("serving on 0.0.0.0:{port}");
            codetrack_web::serve(AppState::new(engine), port).await?;
        }
    }

    Ok(())
}
