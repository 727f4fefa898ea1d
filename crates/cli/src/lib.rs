pub mod logging;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use fai_model::geometry::Rect;
use fai_model::{BubbleId, BubblePatch, BubbleStore, Preferences};
use fai_sidecar::PreferencesStore;
use fai_viewer::{ControllerError, LoadSource, ViewerController};
use logging::{init_logging, Verbosity, DEBUG_PDF_ENV};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory whose first PDF is used when no drawing is named.
pub const SAMPLES_DIR_ENV: &str = "AS9102_SAMPLES_DIR";

#[derive(Debug, Parser)]
#[command(name = "fai")]
#[command(about = "Balloon AS9102 first article inspection drawings")]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// More log output on stderr. Repeat for more detail.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Ignore numbered annotations from other tools when importing.
    #[arg(long, global = true)]
    no_external: bool,
    /// Read preferences from this directory instead of the per-user one.
    #[arg(long, value_name = "DIR", global = true)]
    preferences_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print page geometry as JSON.
    Info {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// List bubbles in page and number order.
    List {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Place a new bubble and save.
    Add {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        /// 1-based page number.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
        /// Anchor as `x,y,width,height` in points, origin top-left.
        #[arg(
            long,
            value_parser = parse_rect,
            allow_hyphen_values = true,
            required_unless_present = "at",
            conflicts_with = "at"
        )]
        rect: Option<Rect>,
        /// Center of a bubble of the preferred size, as `x,y`.
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        at: Option<Point>,
        /// Treat `--rect` or `--at` as placed on the page as displayed (after rotation).
        #[arg(long)]
        view: bool,
        #[arg(long)]
        note: Option<String>,
    },
    /// Change a bubble's note or anchor and save.
    Update {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[command(flatten)]
        target: BubbleTarget,
        #[arg(long, conflicts_with = "clear_note")]
        note: Option<String>,
        #[arg(long)]
        clear_note: bool,
        #[arg(long, value_parser = parse_rect, allow_hyphen_values = true)]
        rect: Option<Rect>,
    },
    /// Delete a bubble and save. Its number is not reused.
    Remove {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[command(flatten)]
        target: BubbleTarget,
    },
    /// Set a page's display rotation and save.
    Rotate {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
        /// 0, 90, 180 or 270 (negative values count counter-clockwise).
        #[arg(long, allow_hyphen_values = true)]
        degrees: i64,
    },
    /// Renumber one page's bubbles in reading order and save.
    Renumber {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
    },
    /// Write a copy of the drawing with bubble annotations.
    Export {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Rebuild an unreadable sidecar, keeping the old one as `.corrupt`.
    Recover {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        /// Start over with no bubbles instead of importing annotations.
        #[arg(long)]
        empty: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct BubbleTarget {
    /// Bubble number (`3` or `#3`) or id.
    #[arg(long, short)]
    bubble: String,
    /// 1-based page, to pick between bubbles sharing a number.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    page: Option<u32>,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: usize,
    sidecar: bool,
    pages: Vec<PageOutput>,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    page: u32,
    width: f32,
    height: f32,
    rotation: u16,
}

#[derive(Debug, Serialize)]
struct BubbleOutput {
    id: BubbleId,
    number: u32,
    page: u32,
    anchor: Rect,
    note: Option<String>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    let verbosity = Verbosity::from_flags(cli.global.quiet, cli.global.verbose)
        .with_debug_switch(std::env::var(DEBUG_PDF_ENV).ok().as_deref());
    init_logging(verbosity);

    let preferences = load_preferences(&cli.global);

    match cli.command {
        Commands::Info { file } => run_info(&resolve_drawing(file)?),
        Commands::List { file, json } => run_list(&resolve_drawing(file)?, preferences, json),
        Commands::Add { file, page, rect, at, view, note } => {
            let rect = match (rect, at) {
                (Some(rect), _) => rect,
                (None, Some(point)) => point.bubble(preferences.marker.bubble_size),
                (None, None) => anyhow::bail!("pass --rect or --at"),
            };
            run_add(&resolve_drawing(file)?, preferences, page, rect, view, note)
        }
        Commands::Update { file, target, note, clear_note, rect } => {
            let mut patch = BubblePatch::default();
            if let Some(note) = note {
                patch = patch.note(note);
            }
            if clear_note {
                patch = patch.clear_note();
            }
            if let Some(rect) = rect {
                patch = patch.anchor(rect);
            }
            run_update(&resolve_drawing(file)?, preferences, &target, patch)
        }
        Commands::Remove { file, target } => {
            run_remove(&resolve_drawing(file)?, preferences, &target)
        }
        Commands::Rotate { file, page, degrees } => {
            run_rotate(&resolve_drawing(file)?, preferences, page, degrees)
        }
        Commands::Renumber { file, page } => {
            run_renumber(&resolve_drawing(file)?, preferences, page)
        }
        Commands::Export { file, output } => {
            let drawing = resolve_drawing(file)?;
            let output = output.unwrap_or_else(|| default_export_output(&drawing));
            run_export(&drawing, preferences, output)
        }
        Commands::Recover { file, empty } => run_recover(&resolve_drawing(file)?, preferences, empty),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_info(file: &Path) -> Result<()> {
    let pages = fai_pdf::inspect_file(file).context("failed to open PDF")?;

    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count: pages.len(),
        sidecar: fai_sidecar::sidecar_exists(file),
        pages: pages
            .iter()
            .zip(1..)
            .map(|(info, page)| {
                let size = info.size();
                PageOutput {
                    page,
                    width: size.width_pt,
                    height: size.height_pt,
                    rotation: info.rotation.degrees(),
                }
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

fn run_list(file: &Path, preferences: Preferences, json: bool) -> Result<()> {
    let controller = open_drawing(file, preferences)?;
    let store = session_store(&controller)?;

    let mut bubbles: Vec<_> = store.bubbles().iter().collect();
    bubbles.sort_by_key(|bubble| (bubble.page_index, bubble.number));

    if json {
        let payload: Vec<BubbleOutput> = bubbles
            .into_iter()
            .map(|bubble| BubbleOutput {
                id: bubble.id,
                number: bubble.number,
                page: bubble.page_index + 1,
                anchor: bubble.anchor,
                note: bubble.note.clone(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for bubble in bubbles {
        let Rect { x, y, width, height } = bubble.anchor;
        let line = format!(
            "p{} #{} at {x:.1},{y:.1} size {width:.1}x{height:.1}",
            bubble.page_index + 1,
            bubble.number
        );
        match &bubble.note {
            Some(note) => println!("{line}  {note}"),
            None => println!("{line}"),
        }
    }

    Ok(())
}

fn run_add(
    file: &Path,
    preferences: Preferences,
    page: u32,
    rect: Rect,
    view: bool,
    note: Option<String>,
) -> Result<()> {
    let mut controller = open_drawing(file, preferences)?;
    let page_index = checked_page(&controller, page)?;

    let bubble = if view {
        controller.add_bubble_in_view(page_index, rect, note)?
    } else {
        controller.add_bubble(page_index, rect, note)?
    };
    save(&mut controller)?;

    println!("added #{} on page {page}", bubble.number);
    Ok(())
}

fn run_update(
    file: &Path,
    preferences: Preferences,
    target: &BubbleTarget,
    patch: BubblePatch,
) -> Result<()> {
    if patch.is_empty() {
        anyhow::bail!("nothing to update; pass --note, --clear-note or --rect");
    }

    let mut controller = open_drawing(file, preferences)?;
    let id = resolve_bubble(session_store(&controller)?, target)?;
    let bubble = controller.update_bubble(id, patch)?;
    save(&mut controller)?;

    println!("updated #{}", bubble.number);
    Ok(())
}

fn run_remove(file: &Path, preferences: Preferences, target: &BubbleTarget) -> Result<()> {
    let mut controller = open_drawing(file, preferences)?;
    let id = resolve_bubble(session_store(&controller)?, target)?;
    let bubble = controller.remove_bubble(id)?;
    save(&mut controller)?;

    println!("removed #{}", bubble.number);
    Ok(())
}

fn run_rotate(file: &Path, preferences: Preferences, page: u32, degrees: i64) -> Result<()> {
    let mut controller = open_drawing(file, preferences)?;
    let page_index = checked_page(&controller, page)?;
    let rotation = controller.set_page_rotation(page_index, clockwise_degrees(degrees))?;
    save(&mut controller)?;

    println!("page {page} rotated to {}", rotation.degrees());
    Ok(())
}

fn run_renumber(file: &Path, preferences: Preferences, page: u32) -> Result<()> {
    let mut controller = open_drawing(file, preferences)?;
    let page_index = checked_page(&controller, page)?;
    let renumbered = controller.renumber_page(page_index)?;
    save(&mut controller)?;

    println!("renumbered {renumbered} bubbles on page {page}");
    Ok(())
}

fn run_export(file: &Path, preferences: Preferences, output: PathBuf) -> Result<()> {
    let mut controller = open_drawing(file, preferences)?;
    let report = controller
        .export(&output)
        .with_context(|| format!("failed to export to {}", output.display()))?;

    if let Some(failure) = &report.failure {
        tracing::warn!(skipped = failure.skipped.len(), "export skipped bubbles");
        eprintln!("warning: {failure}");
    }
    println!("exported {} bubbles to {}", report.exported, report.output.display());

    Ok(())
}

fn run_recover(file: &Path, preferences: Preferences, empty: bool) -> Result<()> {
    let mut controller = ViewerController::new(preferences);
    match controller.open(file) {
        Ok(_) => {
            println!("sidecar is readable; nothing to recover");
            return Ok(());
        }
        Err(ControllerError::Sidecar(err)) => {
            tracing::warn!(error = %err, "rebuilding unreadable sidecar");
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", file.display()));
        }
    }

    let report = if empty { controller.recover_empty()? } else { controller.recover_by_import()? };
    save(&mut controller)?;

    let origin = match report.source {
        LoadSource::Imported(_) => "from drawing annotations",
        LoadSource::Sidecar | LoadSource::Empty => "as an empty set",
    };
    println!("recovered {} bubbles {origin}; old sidecar kept with a .corrupt suffix", report.bubbles);
    Ok(())
}

fn load_preferences(global: &GlobalArgs) -> Preferences {
    let store = match &global.preferences_dir {
        Some(dir) => Ok(PreferencesStore::with_root(dir)),
        None => PreferencesStore::from_default_project(),
    };

    let mut preferences = match store.and_then(|store| store.load()) {
        Ok(preferences) => preferences,
        Err(err) => {
            tracing::warn!(error = %err, "preferences unavailable; using defaults");
            Preferences::default()
        }
    };

    if global.no_external {
        preferences.auto_import_external = false;
    }
    preferences
}

fn resolve_drawing(file: Option<PathBuf>) -> Result<PathBuf> {
    let file = match file {
        Some(file) => file,
        None => default_drawing()?,
    };
    ensure_pdf_exists(&file)?;
    Ok(file)
}

fn default_drawing() -> Result<PathBuf> {
    let dir = std::env::var_os(SAMPLES_DIR_ENV)
        .map(PathBuf::from)
        .with_context(|| format!("no drawing given and {SAMPLES_DIR_ENV} is not set"))?;

    let mut pdfs: Vec<PathBuf> = fs::read_dir(&dir)
        .with_context(|| format!("failed to read samples directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();

    pdfs.into_iter()
        .next()
        .with_context(|| format!("no PDF drawings in {}", dir.display()))
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn open_drawing(file: &Path, preferences: Preferences) -> Result<ViewerController> {
    let mut controller = ViewerController::new(preferences);

    match controller.open(file) {
        Ok(report) => {
            if let LoadSource::Imported(stats) = &report.source {
                tracing::info!(
                    imported = stats.imported,
                    collisions = stats.collisions,
                    "no sidecar; bubbles recovered from annotations"
                );
            }
            Ok(controller)
        }
        Err(err @ ControllerError::Sidecar(_)) => Err(err).with_context(|| {
            format!("sidecar for {} is unreadable; run `fai recover` to rebuild it", file.display())
        }),
        Err(err) => Err(err).with_context(|| format!("failed to open {}", file.display())),
    }
}

fn session_store(controller: &ViewerController) -> Result<&BubbleStore> {
    let session = controller.session().context("no drawing is open")?;
    Ok(&session.store)
}

fn checked_page(controller: &ViewerController, page: u32) -> Result<u32> {
    let page_count = controller.session().map_or(0, |session| session.page_count());
    if page > page_count {
        anyhow::bail!("page {page} is out of range; drawing has {page_count} pages");
    }
    Ok(page - 1)
}

fn resolve_bubble(store: &BubbleStore, target: &BubbleTarget) -> Result<BubbleId> {
    let selector = target.bubble.trim();
    if let Ok(id) = selector.parse::<BubbleId>() {
        return Ok(id);
    }

    let number: u32 = selector
        .trim_start_matches('#')
        .parse()
        .with_context(|| format!("`{selector}` is neither a bubble number nor an id"))?;
    let page_index = target.page.map(|page| page - 1);

    let mut candidates = store.bubbles().iter().filter(|bubble| {
        bubble.number == number && page_index.is_none_or(|page| bubble.page_index == page)
    });

    match (candidates.next(), candidates.next()) {
        (Some(bubble), None) => Ok(bubble.id),
        (None, _) => anyhow::bail!("no bubble numbered {number}"),
        (Some(_), Some(_)) => {
            anyhow::bail!("bubble #{number} appears more than once; pass --page or its id")
        }
    }
}

fn save(controller: &mut ViewerController) -> Result<()> {
    let path = controller.save().context("failed to save sidecar")?;
    tracing::info!(path = %path.display(), "sidecar written");
    Ok(())
}

fn default_export_output(file: &Path) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("drawing");

    file.with_file_name(format!("{stem}-bubbled.pdf"))
}

/// `-90` means a quarter turn counter-clockwise, which is `270`. Values
/// that are not right angles pass through and are rejected downstream.
fn clockwise_degrees(degrees: i64) -> i64 {
    if degrees < 0 && degrees % 90 == 0 {
        degrees.rem_euclid(360)
    } else {
        degrees
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f32,
    y: f32,
}

impl Point {
    fn bubble(self, size: f32) -> Rect {
        Rect::new(self.x - size / 2.0, self.y - size / 2.0, size, size)
    }
}

fn parse_numbers(value: &str, expected: &str) -> Result<Vec<f32>, String> {
    let numbers: Vec<f32> = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|err| format!("expected {expected}: {err}"))?;

    if numbers.iter().any(|number| !number.is_finite()) {
        return Err(format!("expected {expected} as finite numbers"));
    }
    Ok(numbers)
}

fn parse_point(value: &str) -> Result<Point, String> {
    let numbers = parse_numbers(value, "x,y")?;
    let [x, y] = numbers[..] else {
        return Err(format!("expected 2 comma-separated numbers, got {}", numbers.len()));
    };

    Ok(Point { x, y })
}

fn parse_rect(value: &str) -> Result<Rect, String> {
    let numbers = parse_numbers(value, "x,y,width,height")?;
    let [x, y, width, height] = numbers[..] else {
        return Err(format!("expected 4 comma-separated numbers, got {}", numbers.len()));
    };
    if !(width > 0.0 && height > 0.0) {
        return Err("width and height must be positive".to_owned());
    }

    Ok(Rect::new(x, y, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fai_model::Bubble;

    #[test]
    fn rect_arguments_parse() {
        assert_eq!(parse_rect("10,20.5, 24,24"), Ok(Rect::new(10.0, 20.5, 24.0, 24.0)));
        assert_eq!(parse_rect("-5,0,1,1"), Ok(Rect::new(-5.0, 0.0, 1.0, 1.0)));
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_rect("1,2,0,4").is_err());
        assert!(parse_rect("a,b,c,d").is_err());
        assert!(parse_rect("0,0,inf,10").is_err());
        assert!(parse_rect("NaN,0,10,10").is_err());
        assert!(parse_rect("0,-inf,10,10").is_err());
    }

    #[test]
    fn point_arguments_center_a_bubble() {
        let point = parse_point("100, 50").expect("point");
        assert_eq!(point.bubble(24.0), Rect::new(88.0, 38.0, 24.0, 24.0));
        assert!(parse_point("1,2,3").is_err());
        assert!(parse_point("1,nan").is_err());
    }

    #[test]
    fn negative_right_angles_turn_counter_clockwise() {
        assert_eq!(clockwise_degrees(-90), 270);
        assert_eq!(clockwise_degrees(-180), 180);
        assert_eq!(clockwise_degrees(-360), 0);
        assert_eq!(clockwise_degrees(90), 90);
        assert_eq!(clockwise_degrees(-45), -45);
        assert_eq!(clockwise_degrees(450), 450);
    }

    #[test]
    fn export_output_sits_next_to_drawing() {
        let output = default_export_output(Path::new("/drawings/bracket.pdf"));
        assert_eq!(output, Path::new("/drawings/bracket-bubbled.pdf"));
    }

    #[test]
    fn bubbles_resolve_by_number_page_or_id() {
        let anchor = Rect::new(0.0, 0.0, 10.0, 10.0);
        let first = Bubble::restored(BubbleId::new(), 1, 0, anchor, None);
        let second = Bubble::restored(BubbleId::new(), 2, 1, anchor, None);
        let twin = Bubble::restored(BubbleId::new(), 2, 0, anchor, None);
        let store = BubbleStore::from_parts(
            vec![first.clone(), second.clone(), twin.clone()],
            Default::default(),
            3,
        );

        let target =
            |bubble: &str, page: Option<u32>| BubbleTarget { bubble: bubble.to_owned(), page };

        assert_eq!(resolve_bubble(&store, &target("1", None)).expect("unique"), first.id);
        assert_eq!(resolve_bubble(&store, &target("#2", Some(2))).expect("by page"), second.id);
        assert_eq!(resolve_bubble(&store, &target("2", Some(1))).expect("by page"), twin.id);
        assert_eq!(
            resolve_bubble(&store, &target(&twin.id.to_string(), None)).expect("by id"),
            twin.id
        );
        assert!(resolve_bubble(&store, &target("2", None)).is_err());
        assert!(resolve_bubble(&store, &target("7", None)).is_err());
        assert!(resolve_bubble(&store, &target("seven", None)).is_err());
    }
}
