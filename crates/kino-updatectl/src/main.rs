//! Headless host harness for the Kino update manager.
//!
//! The real client drives the updater from its UI; this tool wires the same
//! library against a JSON state store, the system clock, and the OS default
//! handler as the installer, for provisioning and debugging update feeds.

mod logging;
mod settings;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use kino_platform::AppPaths;
use kino_updater::{
    CheckOutcome, DownloadProgress, InstallError, InstallOutcome, JsonStateStore,
    PackageInstaller, ResumeOutcome, StateStore, SystemClock, UpdateConfig, UpdateManager,
    UpdateManifest,
};
use tokio_util::sync::CancellationToken;

use crate::settings::UpdaterSettings;

const EXIT_UPDATE_AVAILABLE: u8 = 3;
const EXIT_USAGE: u8 = 64;

/// Desktop stand-in for the platform installer facility: hands the verified
/// package to the OS default handler. Install permission is implicit here;
/// constrained platforms inject their own [`PackageInstaller`].
struct SystemOpenInstaller;

impl PackageInstaller for SystemOpenInstaller {
    fn install_allowed(&self) -> bool {
        true
    }

    fn begin_install(&self, artifact_path: &Path) -> Result<(), InstallError> {
        open::that(artifact_path).map_err(|error| InstallError::InstallerLaunch {
            path: artifact_path.to_path_buf(),
            details: error.to_string(),
        })
    }
}

fn print_usage() {
    eprintln!(
        "kino-updatectl {}\n\n\
         Usage: kino-updatectl <command>\n\n\
         Commands:\n\
           check [--force]   Query the update feed and report availability\n\
           update            Check, download, verify, and open the installer\n\
           resume            Resume a pending install recorded earlier\n\
           skip <code>       Suppress prompts for exactly this version code\n\
           state             Print the persisted updater state",
        env!("CARGO_PKG_VERSION")
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        print_usage();
        return ExitCode::from(EXIT_USAGE);
    };

    let Ok(paths) = AppPaths::new() else {
        eprintln!("error: cannot determine application directories");
        return ExitCode::FAILURE;
    };
    let settings = UpdaterSettings::load(&paths);
    logging::init_logging(settings.debug_logging, settings.max_log_size_bytes);

    if settings.feed_url.trim().is_empty() {
        eprintln!(
            "error: feed_url is not configured in {}",
            paths.settings_file().display()
        );
        return ExitCode::FAILURE;
    }

    let client = match reqwest::Client::builder()
        .user_agent(concat!("kino-updatectl/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            eprintln!("error: failed to build HTTP client: {error}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = UpdateConfig::new(settings.feed_url.clone(), settings.installed_version_code);
    config.artifact_base_url = settings.artifact_base_url.clone();
    config.channel = settings.channel.clone();
    config.check_interval = Duration::from_secs(settings.check_interval_hours * 60 * 60);
    config.feed_timeout = Duration::from_secs(settings.feed_timeout_secs);
    config.staging_candidates = paths.staging_candidates();

    let store: Arc<JsonStateStore> = Arc::new(JsonStateStore::open(paths.state_file()));
    let manager = UpdateManager::new(
        config,
        client,
        store.clone(),
        Arc::new(SystemOpenInstaller),
        Arc::new(SystemClock),
    );

    match command {
        "check" => run_check(&manager, args.iter().any(|arg| arg == "--force")).await,
        "update" => run_update(&manager).await,
        "resume" => run_resume(&manager),
        "skip" => run_skip(&manager, args.get(1).map(String::as_str)),
        "state" => run_state(store.as_ref()),
        _ => {
            print_usage();
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn run_check(manager: &UpdateManager, force: bool) -> ExitCode {
    match manager.check_for_update(force).await {
        CheckOutcome::AlreadyChecking => {
            println!("Another update check is already running.");
            ExitCode::SUCCESS
        }
        CheckOutcome::UpToDate => {
            println!("Kino is up to date.");
            ExitCode::SUCCESS
        }
        CheckOutcome::Available { manifest, mandatory } => {
            print_offer(&manifest, mandatory);
            ExitCode::from(EXIT_UPDATE_AVAILABLE)
        }
        CheckOutcome::Cached {
            available_version_code,
            error,
        } => {
            // Check failures degrade to "no update available now"; only the
            // message differs.
            if let Some(error) = error {
                eprintln!("error: update check failed: {error}");
            }
            match available_version_code {
                Some(code) => {
                    println!("Update with version code {code} is known to be available.");
                    ExitCode::from(EXIT_UPDATE_AVAILABLE)
                }
                None => {
                    println!("No update known; feed not re-checked.");
                    ExitCode::SUCCESS
                }
            }
        }
    }
}

async fn run_update(manager: &UpdateManager) -> ExitCode {
    let (manifest, mandatory) = match manager.check_for_update(true).await {
        CheckOutcome::AlreadyChecking => {
            println!("Another update check is already running; try again shortly.");
            return ExitCode::SUCCESS;
        }
        CheckOutcome::UpToDate => {
            println!("Kino is up to date.");
            return ExitCode::SUCCESS;
        }
        CheckOutcome::Cached { error: Some(error), .. } => {
            eprintln!("error: update check failed: {error}");
            return ExitCode::FAILURE;
        }
        CheckOutcome::Cached { .. } => {
            println!("The feed serves no manifest for this channel.");
            return ExitCode::SUCCESS;
        }
        CheckOutcome::Available { manifest, mandatory } => (manifest, mandatory),
    };

    print_offer(&manifest, mandatory);

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<DownloadProgress>(32);
    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            if progress.total > 0 {
                print!(
                    "\rDownloading: {} / {} bytes",
                    progress.downloaded, progress.total
                );
            } else {
                print!("\rDownloading: {} bytes", progress.downloaded);
            }
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
        println!();
    });

    let cancel = CancellationToken::new();
    let downloaded = manager.download(&manifest, Some(progress_tx), &cancel).await;
    let _ = printer.await;

    let result = match downloaded {
        Ok(result) => result,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Verified artifact staged at {} ({} bytes).",
        result.path.display(),
        result.actual_size_bytes
    );

    match manager.install(&result.path, manifest.version_code) {
        Ok(InstallOutcome::InstallerOpened) => {
            println!("Handed the artifact to the platform installer.");
            ExitCode::SUCCESS
        }
        Ok(InstallOutcome::PermissionRequired) => {
            println!("Install permission required; the install will resume once granted.");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run_resume(manager: &UpdateManager) -> ExitCode {
    match manager.resume_pending_install() {
        Ok(ResumeOutcome::NoPending) => {
            println!("No pending install recorded.");
            ExitCode::SUCCESS
        }
        Ok(ResumeOutcome::ArtifactMissing) => {
            println!("Pending install artifact is gone; record discarded.");
            ExitCode::SUCCESS
        }
        Ok(ResumeOutcome::AwaitingPermission) => {
            println!("Install permission still missing; pending record kept.");
            ExitCode::SUCCESS
        }
        Ok(ResumeOutcome::InstallerOpened) => {
            println!("Resumed pending install; handed the artifact to the installer.");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run_skip(manager: &UpdateManager, code: Option<&str>) -> ExitCode {
    let Some(code) = code.and_then(|raw| raw.parse::<u32>().ok()).filter(|code| *code > 0) else {
        eprintln!("error: skip requires a positive version code");
        return ExitCode::from(EXIT_USAGE);
    };
    manager.skip_version(code);
    println!("Version code {code} will not be offered again.");
    ExitCode::SUCCESS
}

fn run_state(store: &dyn StateStore) -> ExitCode {
    match store.last_check_at() {
        Some(at) => println!("Last check:        {at}"),
        None => println!("Last check:        never"),
    }
    match store.available_version_code() {
        Some(code) => println!("Available version: {code}"),
        None => println!("Available version: none"),
    }
    match store.skipped_version_code() {
        Some(code) => println!("Skipped version:   {code}"),
        None => println!("Skipped version:   none"),
    }
    match store.pending_install() {
        Some(pending) => println!(
            "Pending install:   version {} at {}",
            pending.version_code,
            pending.artifact_path.display()
        ),
        None => println!("Pending install:   none"),
    }
    ExitCode::SUCCESS
}

fn print_offer(manifest: &UpdateManifest, mandatory: bool) {
    println!(
        "Update {} (code {}) is available{}.",
        manifest.version_name,
        manifest.version_code,
        if mandatory { " and mandatory" } else { "" }
    );
    if let Some(summary) = &manifest.changelog_summary {
        println!("  {summary}");
    }
    for item in &manifest.changelog_items {
        println!("  - {item}");
    }
}
