use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use rollcall_core::detector::FullFrameDetector;
use rollcall_core::ledger::SightingOutcome;
use rollcall_core::recognizer::OnnxEmbedder;
use rollcall_core::roster::parse_folder_name;
use rollcall_core::source::{Clock, SystemClock};
use rollcall_core::{
    AttendanceSession, EnrollmentPipeline, GalleryStore, Identity, LedgerInit, LedgerStore,
    RecognitionLoop, StudentId,
};
use rollcall_hw::Camera;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod capture;
mod config;

use capture::{CameraSource, LogSink};
use config::Config;

/// Conventional status for a process ended by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or re-enroll) one person from a folder of photos
    Enroll {
        /// Folder of .jpg/.jpeg/.png photos, normally named <name>_<id>
        folder: PathBuf,
        /// Name to enroll under instead of the one in the folder name
        #[arg(long)]
        name: Option<String>,
        /// Id to enroll under instead of the one in the folder name
        #[arg(long)]
        id: Option<StudentId>,
    },
    /// Watch the camera and mark attendance until Ctrl-C
    Recognize {
        /// Camera index (/dev/video<N>); overrides the configured one
        #[arg(short, long)]
        device: Option<u32>,
    },
    /// Inspect or edit a day's attendance ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
    /// Inspect or edit the enrolled-face gallery
    Gallery {
        #[command(subcommand)]
        command: GalleryCommand,
    },
    /// Show the roster a new ledger would be seeded with
    Roster,
    /// List V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum LedgerCommand {
    /// Create the day's ledger if missing (rebuilding it if unreadable)
    Init {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the day's ledger
    Show {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Apply one sighting by hand
    Mark {
        id: StudentId,
        /// Time of the sighting (HH:MM:SS); defaults to now
        #[arg(long)]
        at: Option<NaiveTime>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum GalleryCommand {
    /// List enrolled identities with their sample counts
    List,
    /// Remove every sample for an id
    Remove { id: StudentId },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { folder, name, id } => enroll(&config, &folder, name, id)?,
        Commands::Recognize { device } => recognize(&config, device).await?,
        Commands::Ledger { command } => ledger(&config, command)?,
        Commands::Gallery { command } => gallery(&config, command)?,
        Commands::Roster => roster(&config)?,
        Commands::Devices => devices(),
    }

    Ok(())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn enroll(config: &Config, folder: &Path, name: Option<String>, id: Option<StudentId>) -> Result<()> {
    let parsed = folder
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_folder_name);
    let identity = match (name, id, parsed) {
        (Some(name), Some(id), _) => Identity::new(name, id),
        (name, id, Some(parsed)) => Identity::new(
            name.unwrap_or(parsed.name),
            id.unwrap_or(parsed.id),
        ),
        _ => bail!(
            "{} is not named <name>_<id>; pass --name and --id",
            folder.display()
        ),
    };

    let embedder = OnnxEmbedder::load(&config.model_path).context("load embedding model")?;
    let store = GalleryStore::new(&config.gallery_path);
    let mut gallery = store.load().context("load gallery")?;

    let mut pipeline = EnrollmentPipeline::new(FullFrameDetector, embedder);
    let (identity, result) = pipeline
        .enroll_folder(&mut gallery, &store, folder, Some(identity))
        .with_context(|| format!("enroll {}", folder.display()))?;

    println!("Enrolled {} ({})", identity.name, identity.id);
    println!("  processed: {}", result.processed);
    println!("  failed:    {}", result.failed);
    if result.processed == 0 {
        println!("  no usable photos; {} has no gallery entries now", identity.id);
    }
    Ok(())
}

async fn recognize(config: &Config, device: Option<u32>) -> Result<()> {
    let embedder = OnnxEmbedder::load(&config.model_path).context("load embedding model")?;
    let mut session = AttendanceSession::open(
        &GalleryStore::new(&config.gallery_path),
        &LedgerStore::new(&config.attendance_dir),
        &config.roster_source(),
        today(),
    )
    .context("open attendance session")?;
    report_init(&session.ledger_init, session.ledger.path());
    if session.gallery.is_empty() {
        tracing::warn!("gallery is empty; every face will be unknown");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if stop_on_interrupt(tokio::signal::ctrl_c, flag).await {
            tracing::warn!("second interrupt; exiting immediately");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let camera_index = device.unwrap_or(config.camera_index);
    let warmup_frames = config.warmup_frames;
    let skip_dark = config.skip_dark_frames;
    let threshold = config.similarity_threshold;

    let report = tokio::task::spawn_blocking(move || {
        let mut recognition =
            RecognitionLoop::new(FullFrameDetector, embedder, LogSink::default()).threshold(threshold);
        let report = recognition.run(
            || CameraSource::open(camera_index, warmup_frames, skip_dark),
            &mut session,
            &stop,
        )?;
        Ok::<_, anyhow::Error>((report, session.ledger.summary()))
    })
    .await
    .context("recognition task panicked")?
    .context("recognition failed")?;

    let (report, summary) = report;
    println!("Stopped: {:?}", report.stop_reason);
    println!("  frames:             {}", report.frames);
    println!("  faces:              {}", report.faces);
    println!("  sightings:          {}", report.sightings);
    println!("  unregistered:       {}", report.unregistered);
    println!("  unknown faces:      {}", report.unknown_faces);
    println!("  detection failures: {}", report.detection_failures);
    println!("  embedding failures: {}", report.embedding_failures);
    println!("Present {}/{}", summary.present, summary.total);
    Ok(())
}

/// Raise `stop` on the first interrupt. Returns true once a second one
/// arrives; the loop only checks `stop` between frames, so a stalled camera
/// would otherwise never let go.
async fn stop_on_interrupt<F, Fut>(mut interrupt: F, stop: Arc<AtomicBool>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return false;
    }
    tracing::info!("stop requested; press Ctrl-C again to exit immediately");
    stop.store(true, Ordering::SeqCst);
    interrupt().await.is_ok()
}

fn report_init(init: &LedgerInit, path: &Path) {
    match init {
        LedgerInit::Loaded => println!("Ledger loaded: {}", path.display()),
        LedgerInit::Created => println!("Ledger created: {}", path.display()),
        LedgerInit::Recovered { reason } => {
            println!("Ledger rebuilt from roster ({reason}): {}", path.display())
        }
    }
}

fn ledger(config: &Config, command: LedgerCommand) -> Result<()> {
    let ledger_store = LedgerStore::new(&config.attendance_dir);
    let gallery_store = GalleryStore::new(&config.gallery_path);

    match command {
        LedgerCommand::Init { date } => {
            let session = AttendanceSession::open(
                &gallery_store,
                &ledger_store,
                &config.roster_source(),
                date.unwrap_or_else(today),
            )?;
            report_init(&session.ledger_init, session.ledger.path());
            println!("  {} students", session.ledger.records().len());
        }
        LedgerCommand::Show { date } => {
            let date = date.unwrap_or_else(today);
            let Some(ledger) = ledger_store.load(date)? else {
                println!("No readable ledger for {date}");
                return Ok(());
            };
            println!("{:<12} {:<24} {:<6} {:<10} {:<10}", "Date", "Name", "ID", "In", "Out");
            for r in ledger.records() {
                println!(
                    "{:<12} {:<24} {:<6} {:<10} {:<10}",
                    r.date.to_string(),
                    r.name,
                    r.id.as_str(),
                    r.in_time.to_string(),
                    r.out_time.to_string()
                );
            }
            let summary = ledger.summary();
            println!("Present {}, absent {}, total {}", summary.present, summary.absent, summary.total);
        }
        LedgerCommand::Mark { id, at, date } => {
            let mut session = AttendanceSession::open(
                &gallery_store,
                &ledger_store,
                &config.roster_source(),
                date.unwrap_or_else(today),
            )?;
            let at = at.unwrap_or_else(|| SystemClock.now());
            match session.ledger.record_sighting(&id, at)? {
                SightingOutcome::Unregistered => println!("{id} is not on the ledger; nothing changed"),
                SightingOutcome::CheckedIn { at } => println!("{id} checked in at {at}"),
                SightingOutcome::CheckedOut { at, .. } => println!("{id} checked out at {at}"),
            }
        }
    }
    Ok(())
}

fn gallery(config: &Config, command: GalleryCommand) -> Result<()> {
    let store = GalleryStore::new(&config.gallery_path);
    let mut gallery = store.load().context("load gallery")?;

    match command {
        GalleryCommand::List => {
            let identities = gallery.identities();
            if identities.is_empty() {
                println!("No faces enrolled");
            }
            for identity in identities {
                println!("{}  {}  ({} samples)", identity.id, identity.name, identity.samples);
            }
        }
        GalleryCommand::Remove { id } => {
            let removed = gallery.remove(&id)?;
            if removed == 0 {
                println!("{id} has no gallery entries");
                return Ok(());
            }
            store.save(&gallery).context("save gallery")?;
            println!("Removed {removed} samples for {id}");
        }
    }
    Ok(())
}

fn roster(config: &Config) -> Result<()> {
    let gallery = GalleryStore::new(&config.gallery_path)
        .load()
        .context("load gallery")?;
    let roster = config.roster_source().resolve(&gallery)?;
    if roster.is_empty() {
        println!("Roster is empty");
    }
    for identity in roster.entries() {
        println!("{}  {}", identity.id, identity.name);
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for device in devices {
        println!(
            "{}  {}  [{} @ {}]",
            device.path, device.name, device.driver, device.bus
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::{ready, Ready};
    use std::io;

    fn scripted(script: Vec<io::Result<()>>) -> impl FnMut() -> Ready<io::Result<()>> {
        let mut calls = script.into_iter();
        move || ready(calls.next().unwrap_or_else(|| Err(io::Error::other("script exhausted"))))
    }

    #[tokio::test]
    async fn test_second_interrupt_requests_exit() {
        let stop = Arc::new(AtomicBool::new(false));
        let exit = stop_on_interrupt(scripted(vec![Ok(()), Ok(())]), Arc::clone(&stop)).await;
        assert!(exit);
        assert!(stop.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_single_interrupt_only_raises_stop() {
        let stop = Arc::new(AtomicBool::new(false));
        let exit = stop_on_interrupt(scripted(vec![Ok(())]), Arc::clone(&stop)).await;
        assert!(!exit);
        assert!(stop.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_signal_setup_failure_changes_nothing() {
        let stop = Arc::new(AtomicBool::new(false));
        let exit = stop_on_interrupt(scripted(vec![]), Arc::clone(&stop)).await;
        assert!(!exit);
        assert!(!stop.load(Ordering::SeqCst));
    }
}
