//! Check command implementation.
//!
//! Verifies that the icon cache directory is usable, that process memory can
//! be sampled, and that the effective configuration is valid.

use anyhow::{bail, Result};
use overlay_resource_governor::system::{allocator_trim_supported, read_process_memory};
use overlay_resource_governor::{IconCacheManager, SystemClock};
use std::fs;
use std::sync::Arc;

use crate::config::{validate_effective_config, Config};

const WRITE_CHECK_FILE: &str = ".governor-write-check";

pub fn command_check(cache: bool, memory: bool, all: bool, config: &Config) -> Result<()> {
    println!("🔍 Overlay Resource Governor - System Check");
    println!("===========================================");

    let mut all_ok = true;

    if cache || all {
        all_ok &= check_cache(config);
    }

    if memory || all {
        all_ok &= check_memory();
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - governor is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review the output above");
        bail!("system check failed")
    }
}

fn check_cache(config: &Config) -> bool {
    let manager = IconCacheManager::new(
        config.cache_dir(),
        config.max_cache_bytes(),
        Arc::new(SystemClock),
    );
    let dir = manager.cache_dir();
    println!("\n📁 Checking icon cache directory {}...", dir.display());

    if !dir.is_dir() {
        println!("   ❌ Directory does not exist and could not be created");
        return false;
    }
    println!("   ✅ Directory exists");

    let marker = dir.join(WRITE_CHECK_FILE);
    match fs::write(&marker, b"check").and_then(|_| fs::remove_file(&marker)) {
        Ok(()) => println!("   ✅ Directory is writable"),
        Err(e) => {
            println!("   ❌ Directory is not writable: {}", e);
            return false;
        }
    }

    match manager.list_entries() {
        Ok(entries) => {
            let stats = manager.stats();
            println!(
                "   ✅ {} files, {} KB of {} KB budget",
                entries.len(),
                stats.size_bytes / 1024,
                stats.max_size_bytes / 1024
            );
            if stats.size_bytes > stats.max_size_bytes {
                println!("   ⚠️  Cache is over budget; the next cycle will evict files");
            }
            true
        }
        Err(e) => {
            println!("   ❌ Cannot list cache directory: {}", e);
            false
        }
    }
}

fn check_memory() -> bool {
    println!("\n💾 Checking process memory sampling...");
    let ok = match read_process_memory() {
        Ok(mem) => {
            println!(
                "   ✅ RSS={}MB, heap used={}MB, heap total={}MB, external={}MB",
                mem.rss / 1024 / 1024,
                mem.heap_used / 1024 / 1024,
                mem.heap_total / 1024 / 1024,
                mem.external / 1024 / 1024
            );
            true
        }
        Err(e) => {
            println!("   ❌ Memory sampling failed: {}", e);
            false
        }
    };

    if allocator_trim_supported() {
        println!("   ✅ Allocator trim available for manual collection");
    } else {
        println!("   ⚠️  No manual collection hook on this platform; GC requests are skipped");
    }
    ok
}
