//! Check external tool availability.

use pipcut_render::transcode::{tool_version, REQUIRED_TOOLS};

pub fn run() -> anyhow::Result<()> {
    println!("pipcut dependency check");
    println!("{}", "=".repeat(50));

    let mut missing = Vec::new();
    for (bin, purpose) in REQUIRED_TOOLS {
        match tool_version(bin) {
            Some(version) => println!("[OK] {bin}: {version}"),
            None => {
                println!("[MISSING] {bin} -- {purpose}");
                missing.push(bin);
            }
        }
    }

    println!();
    if missing.is_empty() {
        println!("All required tools are available.");
        Ok(())
    } else {
        anyhow::bail!(
            "missing required tools: {} (install ffmpeg)",
            missing.join(", ")
        )
    }
}
