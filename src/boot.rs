use log::{error, info, warn};
use std::fs;
use std::path::Path;

/// Directories created at startup if missing.
const REQUIRED_DIRS: &[&str] = &["data", "data/uploads", "data/uploads/avatars"];

/// Run the startup checks before Rocket launches. Creates missing
/// directories and returns an error if the data directory is unusable.
/// `db_path` is checked for a writable parent.
pub fn run(db_path: &str) -> Result<(), String> {
    info!("Boot check starting...");

    let mut warnings = 0u32;
    let mut errors = 0u32;

    // ── 1. Directories ─────────────────────────────────
    let db_dir = Path::new(db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf());
    let mut dirs: Vec<&Path> = REQUIRED_DIRS.iter().map(Path::new).collect();
    if let Some(dir) = db_dir.as_deref() {
        dirs.push(dir);
    }
    for path in dirs {
        if !path.exists() {
            match fs::create_dir_all(path) {
                Ok(_) => info!("  Created directory: {}", path.display()),
                Err(e) => {
                    error!("  FAILED to create directory {}: {}", path.display(), e);
                    errors += 1;
                }
            }
        }
    }

    // ── 2. Database directory writable ──────────────────
    let db_dir = db_dir.unwrap_or_else(|| Path::new(".").to_path_buf());
    if db_dir.exists() && !writable(&db_dir) {
        error!("  Database directory not writable: {}", db_dir.display());
        errors += 1;
    }

    // ── 3. Uploads directory writable ───────────────────
    let uploads_dir = Path::new("data/uploads/avatars");
    if uploads_dir.exists() && !writable(uploads_dir) {
        warn!("  Avatar directory not writable (avatar uploads will fail)");
        warnings += 1;
    }

    // ── 4. Rocket.toml exists ───────────────────────────
    if !Path::new("Rocket.toml").exists() {
        warn!("  Rocket.toml not found, using default config (set ROCKET_SECRET_KEY in production)");
        warnings += 1;
    }

    // ── Summary ─────────────────────────────────────────
    if errors > 0 {
        return Err(format!(
            "Boot check FAILED: {} error(s), {} warning(s)",
            errors, warnings
        ));
    }

    if warnings > 0 {
        warn!(
            "Boot check passed with {} warning(s). Some features may not work correctly.",
            warnings
        );
    } else {
        info!("Boot check passed.");
    }
    Ok(())
}

fn writable(dir: &Path) -> bool {
    let test_file = dir.join(".write_test");
    match fs::write(&test_file, "test") {
        Ok(_) => {
            let _ = fs::remove_file(&test_file);
            true
        }
        Err(_) => false,
    }
}
