//! kiln CLI - build-recipe engine front end
//!
//! Usage:
//!   kiln build <recipe> -s os=linux -s build_type=release
//!   kiln build <recipe> --profile linux.toml --profile windows.toml
//!   kiln resolve <recipe>          Resolve requirements without building
//!   kiln export <recipe> <dest>    Copy the exported recipe sources
//!   kiln info <recipe>             Show recipe details

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kiln::invoke::CommandTool;
use kiln::output;
use kiln::store::{walk_tree, PackageStore};
use kiln::{Engine, Profile, Recipe};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Declarative build-recipe engine for native dependencies")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of recipe files used to seed the package index
    #[arg(short = 'r', long, global = true)]
    recipes_dir: Option<PathBuf>,

    /// Package store root
    #[arg(long, global = true, env = "KILN_STORE")]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, build, package, and install a recipe
    Build {
        /// Path to the recipe file
        recipe: PathBuf,

        /// Setting value, e.g. -s os=linux (repeatable)
        #[arg(short = 's', long = "setting", value_name = "KEY=VALUE")]
        settings: Vec<String>,

        /// Option value, e.g. -o shared=false (repeatable)
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Profile file with [settings] and [options] tables (repeatable;
        /// several profiles build in parallel)
        #[arg(short = 'p', long = "profile")]
        profiles: Vec<PathBuf>,

        /// Build working directory (temp dir if not given)
        #[arg(short = 'w', long)]
        work_dir: Option<PathBuf>,

        /// Kill the build tool after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum parallel profile builds
        #[arg(short = 'j', long, default_value_t = num_cpus::get())]
        jobs: usize,

        /// Log tool commands without executing them
        #[arg(long)]
        dry_run: bool,

        /// Print tool commands as they execute
        #[arg(short, long)]
        verbose: bool,
    },

    /// Resolve a recipe's requirements and print the pinned set
    Resolve {
        /// Path to the recipe file
        recipe: PathBuf,
    },

    /// Copy the exported subset of the recipe's sources
    Export {
        /// Path to the recipe file
        recipe: PathBuf,

        /// Destination directory
        dest: PathBuf,
    },

    /// Show recipe details
    Info {
        /// Path to the recipe file
        recipe: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            recipe,
            settings,
            options,
            profiles,
            work_dir,
            timeout,
            jobs,
            dry_run,
            verbose,
        } => build(
            &cli.recipes_dir,
            &cli.store,
            &recipe,
            BuildArgs {
                settings,
                options,
                profiles,
                work_dir,
                timeout,
                jobs,
                dry_run,
                verbose,
            },
        ),
        Commands::Resolve { recipe } => resolve(&cli.recipes_dir, &recipe),
        Commands::Export { recipe, dest } => export(&recipe, &dest),
        Commands::Info { recipe } => info(&recipe),
    }
}

struct BuildArgs {
    settings: Vec<String>,
    options: Vec<String>,
    profiles: Vec<PathBuf>,
    work_dir: Option<PathBuf>,
    timeout: Option<u64>,
    jobs: usize,
    dry_run: bool,
    verbose: bool,
}

/// Load a recipe file with context on failure.
fn load_recipe(path: &Path) -> Result<Recipe> {
    Recipe::load(path).with_context(|| format!("failed to load recipe {}", path.display()))
}

/// Seed the index from every recipe next to the one being built (or an
/// explicit --recipes-dir), so pinned requirements resolve offline.
fn seed_index(engine: &Engine, recipes_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(recipes_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            if let Ok(recipe) = Recipe::load(&path) {
                engine
                    .index()
                    .publish(recipe.reference(), recipe.metadata.clone());
            }
        }
    }
}

fn parse_pairs(pairs: &[String], what: &str) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => Ok((key.to_string(), value.to_string())),
            None => bail!("invalid {} '{}', expected KEY=VALUE", what, pair),
        })
        .collect()
}

fn inline_profile(settings: &[String], options: &[String]) -> Result<Profile> {
    let mut profile = Profile::default();
    for (key, value) in parse_pairs(settings, "setting")? {
        profile.settings.insert(key, value);
    }
    for (key, value) in parse_pairs(options, "option")? {
        // Option values are typed; parse bools and integers like TOML does.
        let value = match value.as_str() {
            "true" => kiln::settings::OptionValue::Bool(true),
            "false" => kiln::settings::OptionValue::Bool(false),
            other => match other.parse::<i64>() {
                Ok(n) => kiln::settings::OptionValue::Int(n),
                Err(_) => kiln::settings::OptionValue::Str(other.to_string()),
            },
        };
        profile.options.insert(key, value);
    }
    Ok(profile)
}

fn load_profiles(args: &BuildArgs) -> Result<Vec<Profile>> {
    if args.profiles.is_empty() {
        return Ok(vec![inline_profile(&args.settings, &args.options)?]);
    }
    args.profiles
        .iter()
        .map(|path| {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read profile {}", path.display()))?;
            toml::from_str(&source)
                .with_context(|| format!("failed to parse profile {}", path.display()))
        })
        .collect()
}

fn build(
    recipes_dir: &Option<PathBuf>,
    store_root: &Option<PathBuf>,
    recipe_path: &Path,
    args: BuildArgs,
) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let profiles = load_profiles(&args)?;

    let store = PackageStore::open(
        store_root
            .clone()
            .unwrap_or_else(PackageStore::default_root),
    )?;
    let engine = Engine::new(Arc::new(kiln::index::MemoryIndex::new())).with_store(store);

    let seed_dir = recipes_dir
        .clone()
        .or_else(|| recipe_path.parent().map(Path::to_path_buf));
    if let Some(dir) = &seed_dir {
        seed_index(&engine, dir);
    }

    let work_root = match &args.work_dir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join("kiln-build"),
    };

    output::action(&format!("Building {}", recipe.reference()));

    let progress = (profiles.len() > 1).then(|| output::build_progress(profiles.len() as u64));
    let queue: Mutex<VecDeque<(usize, Profile)>> =
        Mutex::new(profiles.into_iter().enumerate().collect());
    let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        let workers = args.jobs.max(1);
        for _ in 0..workers {
            scope.spawn(|| loop {
                let job = queue.lock().unwrap().pop_front();
                let Some((slot, profile)) = job else {
                    break;
                };
                let work_dir = work_root.join(format!("profile-{slot}"));
                let output_dir = work_dir.join("out");
                let _ = std::fs::create_dir_all(&output_dir);

                let mut tool = CommandTool::new(&work_dir, &output_dir)
                    .dry_run(args.dry_run)
                    .verbose(args.verbose);
                if let Some(secs) = args.timeout {
                    tool = tool.timeout(Duration::from_secs(secs));
                }

                match engine.build(&recipe, &profile, &tool) {
                    Ok(report) => {
                        for note in &report.warnings {
                            output::warning(&note.to_string());
                        }
                        if report.cached {
                            output::skip(&format!(
                                "{} ({}) already built, skipping",
                                report.reference, report.config_digest
                            ));
                        } else {
                            output::success(&format!(
                                "{} ({}) packaged, libs [{}]",
                                report.reference,
                                report.config_digest,
                                report.metadata.libs.join(", ")
                            ));
                        }
                    }
                    Err(err) => failures.lock().unwrap().push(err.to_string()),
                }
                if let Some(bar) = &progress {
                    bar.inc(1);
                }
            });
        }
    });

    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    let failures = failures.into_inner().unwrap();
    if !failures.is_empty() {
        for failure in &failures {
            output::error(failure);
        }
        bail!("{} build(s) failed", failures.len());
    }
    Ok(())
}

fn resolve(recipes_dir: &Option<PathBuf>, recipe_path: &Path) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let engine = Engine::new(Arc::new(kiln::index::MemoryIndex::new()));
    let seed_dir = recipes_dir
        .clone()
        .or_else(|| recipe_path.parent().map(Path::to_path_buf));
    if let Some(dir) = &seed_dir {
        seed_index(&engine, dir);
    }

    output::action(&format!("Resolving {}", recipe.reference()));
    let resolution = recipe.requirement_set().resolve(engine.index())?;
    for note in &resolution.warnings {
        output::warning(&note.to_string());
    }
    for pin in resolution.pinned() {
        output::detail(&format!("pinned {}", pin));
    }
    output::success(&format!(
        "{} requirement(s) resolved",
        resolution.pinned().len()
    ));
    Ok(())
}

fn export(recipe_path: &Path, dest: &Path) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let source_root = recipe_path.parent().unwrap_or(Path::new("."));

    let files = walk_tree(source_root);
    let exported = kiln::export::filter(&files, &recipe.export.include, &recipe.export.exclude)?;

    output::action(&format!(
        "Exporting {} ({} file(s))",
        recipe.reference(),
        exported.len()
    ));
    for file in &exported {
        let target = dest.join(file);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source_root.join(file), &target)
            .with_context(|| format!("failed to export {}", file.display()))?;
        output::detail(&file.display().to_string());
    }
    output::success("export complete");
    Ok(())
}

fn info(recipe_path: &Path) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;

    output::action(&recipe.reference().to_string());
    if let Some(description) = &recipe.description {
        output::info(description);
    }
    if let Some(license) = &recipe.license {
        output::detail(&format!("license: {}", license));
    }
    output::detail(&format!("build tool: {}", recipe.build.tool));

    if !recipe.requires().is_empty() {
        output::info("requires:");
        for requirement in recipe.requires() {
            let marker = if requirement.is_override {
                " (override)"
            } else {
                ""
            };
            output::detail(&format!("{}{}", requirement.reference, marker));
        }
    }
    if !recipe.artifacts.is_empty() {
        output::info("artifacts:");
        for rule in &recipe.artifacts {
            output::detail(&format!(
                "{} -> {}{}",
                rule.pattern,
                rule.dest,
                if rule.flatten { " (flatten)" } else { "" }
            ));
        }
    }
    if !recipe.metadata.libs.is_empty() {
        output::info(&format!("libs: {}", recipe.metadata.libs.join(", ")));
    }
    Ok(())
}
