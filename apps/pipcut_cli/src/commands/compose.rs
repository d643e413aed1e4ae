//! Probe three clips, compose them and export the result.

use std::path::PathBuf;

use anyhow::Context;
use pipcut_core::session::{ClipSlot, Session};
use pipcut_core::settings::ExportSettings;
use pipcut_core::Composer;
use pipcut_render::{build_ffmpeg_args, compile, probe_clip, ExportStatus, Exporter};
use tokio::sync::oneshot;

pub struct ComposeArgs {
    pub config: Option<PathBuf>,
    pub inputs: [PathBuf; 3],
    pub scale: Option<f64>,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

pub async fn run(args: ComposeArgs) -> anyhow::Result<()> {
    let settings = resolve_settings(&args)?;
    let mut session = Session::new(settings);

    for (slot, path) in ClipSlot::ALL.into_iter().zip(&args.inputs) {
        let clip = probe_clip(path)
            .with_context(|| format!("probing {slot} clip {}", path.display()))?;
        session.assign(slot, clip);
    }
    let (first, second, overlay) = session
        .ready()
        .context("all three clips are required")?;

    let (composition, spec) =
        Composer::from_settings(&session.settings).compose(first, second, overlay)?;
    let destination = session.settings.resolved_output_path();

    println!("Composition");
    println!("  canvas:   {} @ {} fps", spec.render_size, spec.frame_rate);
    println!("  duration: {}", spec.duration());
    println!("  joined:   {} + {}", first.name, second.name);
    println!(
        "  overlay:  {} at {}x",
        overlay.name, session.settings.scale_factor
    );
    println!("  output:   {}", destination.display());

    if args.dry_run {
        let plan = compile(&composition, &spec, &destination)?;
        println!();
        println!("ffmpeg {}", shell_join(&build_ffmpeg_args(&plan)));
        return Ok(());
    }

    let (tx, mut rx) = oneshot::channel();
    let job = Exporter::default().export(&composition, &spec, &destination, move |status| {
        let _ = tx.send(status);
    })?;

    let mut progress = job.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow_and_update().clone();
            match p.eta_seconds {
                Some(eta) => eprint!("\r  {:5.1}%  {}  eta {:.0}s   ", p.percent, p.speed, eta),
                None => eprint!("\r  {:5.1}%  {}   ", p.percent, p.speed),
            }
        }
    });

    let status = tokio::select! {
        status = &mut rx => status?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, cancelling export");
            job.cancel();
            rx.await?
        }
    };
    reporter.abort();
    eprintln!();

    match status {
        ExportStatus::Completed => {
            println!("Wrote {}", destination.display());
            Ok(())
        }
        ExportStatus::Failed(msg) => anyhow::bail!("export failed: {msg}"),
        ExportStatus::Cancelled => anyhow::bail!("export cancelled"),
    }
}

fn resolve_settings(args: &ComposeArgs) -> anyhow::Result<ExportSettings> {
    let mut settings = match &args.config {
        Some(path) => ExportSettings::load_from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => ExportSettings::default(),
    };
    if let Some(scale) = args.scale {
        settings.scale_factor = scale;
    }
    if let Some(output) = &args.output {
        settings.output_path = Some(output.clone());
    }
    Ok(settings)
}

/// Quote arguments that the shell would otherwise split.
fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.is_empty() || a.contains(|c: char| c.is_whitespace() || "[];'\"|&$".contains(c)) {
                format!("'{}'", a.replace('\'', r"'\''"))
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
