use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use scrollpdf_core::{
    Destination, FileKeyValueStore, OutlineNode, ProgressStore, Viewer, ViewerConfig, ViewerEvent,
    WindowScheduler,
};
use scrollpdf_render::PdfDocumentProvider;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "scrollpdf",
    version,
    about = "Virtualized PDF viewer driven by line commands"
)]
struct Args {
    /// Path or file:// URL of the document to open
    locator: String,

    /// Page to jump to after opening (1-based); overrides saved progress
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Initial zoom factor
    #[arg(short = 's', long = "scale")]
    scale: Option<f32>,

    /// Pages kept rendered on each side of the current page
    #[arg(short = 'r', long = "radius")]
    radius: Option<usize>,

    /// Height of the simulated viewport in pixels
    #[arg(long = "viewport-height", default_value_t = 900.0)]
    viewport_height: f32,

    /// Config file to use instead of the platform default
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
enum LineCommand {
    Scroll { screens: f32 },
    Zoom { factor: f32 },
    SetScale { scale: f32 },
    GotoPage { page: usize },
    OutlineJump { entry: usize },
    ShowOutline,
    Back,
    Forward,
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<LineCommand>> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    if parts.next().is_some() {
        return Err(anyhow!("too many arguments for {head:?}"));
    }
    let count = |default: f32| -> Result<f32> {
        match arg {
            Some(raw) => raw
                .parse::<f32>()
                .map_err(|_| anyhow!("expected a number, got {raw:?}")),
            None => Ok(default),
        }
    };
    let index = |what: &str| -> Result<usize> {
        let raw = arg.ok_or_else(|| anyhow!("{head} needs a {what}"))?;
        raw.parse::<usize>()
            .map_err(|_| anyhow!("expected a {what}, got {raw:?}"))
    };

    let command = match head {
        "j" | "down" => LineCommand::Scroll {
            screens: count(1.0)?,
        },
        "k" | "up" => LineCommand::Scroll {
            screens: -count(1.0)?,
        },
        "+" => LineCommand::Zoom { factor: 1.25 },
        "-" => LineCommand::Zoom { factor: 0.8 },
        "z" | "zoom" => LineCommand::SetScale {
            scale: count(1.0)?,
        },
        "g" | "goto" => LineCommand::GotoPage {
            page: index("page number")?,
        },
        "o" | "open" => LineCommand::OutlineJump {
            entry: index("outline entry")?,
        },
        "t" | "toc" => LineCommand::ShowOutline,
        "b" | "back" => LineCommand::Back,
        "f" | "forward" => LineCommand::Forward,
        "s" | "status" => LineCommand::Status,
        "h" | "help" | "?" => LineCommand::Help,
        "q" | "quit" => LineCommand::Quit,
        other => return Err(anyhow!("unknown command {other:?}; try `help`")),
    };
    Ok(Some(command))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "scrollpdf", "scrollpdf")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config = load_config(&args, project_dirs.config_dir().join("config.toml"))?;
    let state_dir = project_dirs.data_local_dir().join("state");
    let progress = ProgressStore::new(Arc::new(FileKeyValueStore::new(state_dir)?));
    let provider = Arc::new(PdfDocumentProvider::new()?);

    let mut viewer = Viewer::new(config, provider, progress);
    viewer.set_viewport_height(args.viewport_height);
    viewer
        .open(&args.locator)
        .await
        .with_context(|| format!("failed to open {:?}", args.locator))?;
    if let Some(page) = args.page {
        viewer.go_to_page(page)?;
    }
    settle(&mut viewer).await;

    let mut stdout = io::stdout();
    print_status(&mut stdout, &viewer)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read command")?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                writeln!(stdout, "error: {err}")?;
                continue;
            }
        };
        if command == LineCommand::Quit {
            break;
        }
        if let Err(err) = run_command(&mut viewer, &mut stdout, command).await {
            writeln!(stdout, "error: {err}")?;
        }
        settle(&mut viewer).await;
        print_status(&mut stdout, &viewer)?;
    }

    viewer.close();
    Ok(())
}

async fn run_command(
    viewer: &mut Viewer,
    out: &mut impl Write,
    command: LineCommand,
) -> Result<()> {
    match command {
        LineCommand::Scroll { screens } => {
            viewer.scroll_by(screens * viewer.viewport_height());
        }
        LineCommand::Zoom { factor } => {
            viewer.zoom_by(factor)?;
        }
        LineCommand::SetScale { scale } => {
            viewer.set_scale(scale)?;
        }
        LineCommand::GotoPage { page } => {
            viewer.go_to_page(page)?;
        }
        LineCommand::OutlineJump { entry } => {
            let destination = outline_destination(viewer.outline(), entry)?;
            viewer.go_to(&destination).await?;
        }
        LineCommand::ShowOutline => write_outline(out, viewer.outline())?,
        LineCommand::Back => {
            if viewer.back().is_none() {
                writeln!(out, "jump list is empty")?;
            }
        }
        LineCommand::Forward => {
            if viewer.forward().is_none() {
                writeln!(out, "no newer jump")?;
            }
        }
        LineCommand::Status => {}
        LineCommand::Help => write_help(out)?,
        LineCommand::Quit => {}
    }
    Ok(())
}

fn outline_destination(outline: &[OutlineNode], entry: usize) -> Result<Destination> {
    OutlineNode::flatten(outline)
        .get(entry.wrapping_sub(1))
        .map(|(_, node)| node.destination.clone())
        .ok_or_else(|| anyhow!("outline has no entry {entry}"))
}

async fn settle(viewer: &mut Viewer) {
    for err in viewer.settle().await {
        warn!(page = err.page(), error = %err, "page failed to render");
    }
    for event in viewer.drain_events() {
        match event {
            ViewerEvent::DocumentOpened {
                locator,
                page_count,
            } => info!(%locator, page_count, "document opened"),
            ViewerEvent::PageChanged(page) => info!(page, "current page changed"),
            ViewerEvent::ScaleChanged(scale) => info!(scale, "scale changed"),
            _ => {}
        }
    }
}

fn format_status(viewer: &Viewer) -> String {
    let viewport = viewer.viewport();
    let window = WindowScheduler::window(
        viewport.current_page,
        viewport.window_radius,
        viewer.page_count(),
    );
    let (active, bytes) = viewer
        .slots()
        .map(|slots| (slots.active_pages(), slots.resident_bytes()))
        .unwrap_or_default();
    let window = match window {
        Some(range) => format!("{}-{}", range.start(), range.end()),
        None => "-".to_string(),
    };
    format!(
        "page {}/{} | scale {:.2} | window {} | rendered {} pages ({} KiB)",
        viewport.current_page,
        viewer.page_count(),
        viewport.scale,
        window,
        active.len(),
        bytes / 1024
    )
}

fn print_status(out: &mut impl Write, viewer: &Viewer) -> Result<()> {
    writeln!(out, "{}", format_status(viewer))?;
    out.flush()?;
    Ok(())
}

fn write_outline(out: &mut impl Write, outline: &[OutlineNode]) -> Result<()> {
    let entries = OutlineNode::flatten(outline);
    if entries.is_empty() {
        writeln!(out, "document has no outline")?;
        return Ok(());
    }
    for (position, (depth, node)) in entries.iter().enumerate() {
        writeln!(
            out,
            "{:>4} {}{}",
            position + 1,
            "  ".repeat(*depth),
            node.title
        )?;
    }
    Ok(())
}

fn write_help(out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "j/k [n]  scroll n screens\n\
         + / -    zoom in/out\n\
         z S      set scale\n\
         g N      go to page N\n\
         t        list outline\n\
         o N      jump to outline entry N\n\
         b / f    back / forward in jump list\n\
         s        status\n\
         q        quit"
    )?;
    Ok(())
}

fn load_config(args: &Args, default_path: PathBuf) -> Result<ViewerConfig> {
    let path = args.config.clone().unwrap_or(default_path);
    let mut config = ViewerConfig::load(&path)?;
    if let Some(radius) = args.radius {
        config.window_radius = radius;
    }
    if let Some(scale) = args.scale {
        config.default_scale = scale;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "scrollpdf.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // Stdout carries the status lines.
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
