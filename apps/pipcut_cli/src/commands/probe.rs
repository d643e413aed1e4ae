//! Print a clip description.

use std::path::PathBuf;

use anyhow::Context;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let clip = pipcut_render::probe_clip(&path)
        .with_context(|| format!("probing {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&clip)?);
    Ok(())
}
