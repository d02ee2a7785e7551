//! Generate testdata command implementation.
//!
//! Fills a directory with synthetic icon files of random size and age so the
//! eviction path can be exercised without a running overlay.

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use overlay_resource_governor::cache_file_name;
use rand::Rng;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Manifest location for `output`: a sibling file, so it never counts as an icon.
pub fn manifest_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "testdata".to_string());
    output.with_file_name(format!("{}-manifest.json", name))
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedIcon {
    pub file: String,
    pub source: String,
    pub size: u64,
    pub modified: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestData {
    pub version: String,
    pub generated_at: String,
    pub total_bytes: u64,
    pub icons: Vec<GeneratedIcon>,
}

/// Writes `count` icon files between `min_kb` and `max_kb` into `output`.
pub fn command_generate_testdata(
    output: PathBuf,
    count: usize,
    min_kb: u64,
    max_kb: u64,
    age_days: u32,
) -> Result<()> {
    let data = generate_testdata(&output, count, min_kb, max_kb, age_days)?;
    println!(
        "✅ Generated {} icons ({} KB) in {}",
        data.icons.len(),
        data.total_bytes / 1024,
        output.display()
    );
    Ok(())
}

fn generate_testdata(
    output: &Path,
    count: usize,
    min_kb: u64,
    max_kb: u64,
    age_days: u32,
) -> Result<TestData> {
    if min_kb == 0 || min_kb > max_kb {
        bail!("invalid size range {}..={} KB", min_kb, max_kb);
    }
    debug!(
        "Generating test data: count={}, sizes={}..={} KB, age_days={}, output={}",
        count,
        min_kb,
        max_kb,
        age_days,
        output.display()
    );

    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut rng = rand::thread_rng();
    let now = Utc::now();
    let max_age_secs = i64::from(age_days) * 24 * 60 * 60;
    let mut icons = Vec::with_capacity(count);

    for i in 0..count {
        let source = format!("C:\\Program Files\\App{}\\app{}.exe", i / 4, i);
        let file = cache_file_name(&source, &(i % 4).to_string());
        let size = rng.gen_range(min_kb..=max_kb) * 1024;
        let age = if max_age_secs > 0 {
            rng.gen_range(0..=max_age_secs)
        } else {
            0
        };
        let modified = now - ChronoDuration::seconds(age);

        let path = output.join(&file);
        write_icon(&path, size, modified.into())?;

        icons.push(GeneratedIcon {
            file,
            source,
            size,
            modified: modified.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        });
    }

    let data = TestData {
        version: "1.0".to_string(),
        generated_at: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        total_bytes: icons.iter().map(|i| i.size).sum(),
        icons,
    };

    let manifest = serde_json::to_string_pretty(&data)?;
    fs::write(manifest_path(output), manifest)?;
    Ok(data)
}

fn write_icon(path: &Path, size: u64, modified: SystemTime) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    // ICO header: reserved, type 1, zero images. Sizes are at least 1 KB.
    let mut bytes = vec![0u8; size as usize];
    bytes[..6].copy_from_slice(&[0, 0, 1, 0, 0, 0]);
    file.write_all(&bytes)?;
    file.set_modified(modified)?;
    Ok(())
}
