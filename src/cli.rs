use crate::{
    context::{AppContext, Environment, Overrides},
    priority::PriorityEntry,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct GlobalOptions {
    format: OutputFormat,
    overrides: Overrides,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Paths,
    Order,
    Get { section: String, option: String },
    Set { section: String, option: String, value: String },
    Priority { id: String, value: String },
    Remove { id: String },
    Repair,
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("w3mm v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let ctx = AppContext::start(&global.overrides, Environment::detect())?;
            let result = run_command(&ctx, command, global.format);
            let flushed = ctx.shutdown().context("Failed to save configuration");
            result.and(flushed)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    let (global, tokens) = parse_global_options(args)?;
    let command = parse_command(&tokens)?;
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut overrides = Overrides::default();
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let slot = match flag {
            "--format" => None,
            "-u" | "--userdocuments" => Some(&mut overrides.documents),
            "-g" | "--game" => Some(&mut overrides.game),
            "-c" | "--config" => Some(&mut overrides.config),
            _ => {
                tokens.push(arg.to_string());
                continue;
            }
        };
        let Some(value) = inline.or_else(|| iter.next().cloned()) else {
            bail!("{flag} requires a value");
        };
        match slot {
            Some(slot) => *slot = Some(PathBuf::from(value)),
            None => {
                format = OutputFormat::parse(&value)
                    .ok_or_else(|| anyhow::anyhow!("Unknown format: {value} (use 'text' or 'json')"))?;
            }
        }
    }

    Ok((GlobalOptions { format, overrides }, tokens))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let arg = |index: usize, what: &str| -> Result<String> {
        tokens
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{head} requires {what}"))
    };
    let command = match head.as_str() {
        "--help" | "-h" | "help" => CliCommand::Help,
        "--version" | "-V" | "version" => CliCommand::Version,
        "paths" => CliCommand::Paths,
        "order" => CliCommand::Order,
        "get" => CliCommand::Get {
            section: arg(1, "a section")?,
            option: arg(2, "an option")?,
        },
        "set" => CliCommand::Set {
            section: arg(1, "a section")?,
            option: arg(2, "an option")?,
            value: arg(3, "a value")?,
        },
        "priority" => {
            let id = arg(1, "a mod id")?;
            let value = arg(2, "a priority")?;
            if value.parse::<u32>().is_err() {
                bail!("Priority must be a non-negative number, got '{value}'");
            }
            CliCommand::Priority { id, value }
        }
        "remove" => CliCommand::Remove {
            id: arg(1, "a mod id")?,
        },
        "repair" => CliCommand::Repair,
        other => bail!("Unknown command: {other} (see --help)"),
    };
    Ok(command)
}

fn run_command(ctx: &AppContext, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::Paths => list_paths(ctx, format),
        CliCommand::Order => list_order(ctx, format),
        CliCommand::Get { section, option } => get_option(ctx, &section, &option, format),
        CliCommand::Set {
            section,
            option,
            value,
        } => {
            if !ctx.settings.set(&section, &option, &value, true) {
                bail!("Cannot store option '{option}' in [{section}]");
            }
            print_value(format, &section, &option, Some(value))
        }
        CliCommand::Priority { id, value } => {
            if !ctx.priorities.set_priority(&id, &value) {
                bail!("Cannot store a priority for '{id}'");
            }
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&entry_of(ctx, &id))?);
                }
                OutputFormat::Text => println!("{id}: priority {value}"),
            }
            Ok(())
        }
        CliCommand::Remove { id } => {
            if !ctx.priorities.contains(&id) {
                bail!("Unknown mod: {id}");
            }
            ctx.priorities
                .remove_priority(&id)
                .with_context(|| format!("Failed to remove {id}"))?;
            if format == OutputFormat::Text {
                println!("Removed {id}");
            }
            Ok(())
        }
        CliCommand::Repair => repair(ctx, format),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn entry_of(ctx: &AppContext, id: &str) -> Option<PriorityEntry> {
    ctx.priorities
        .entries()
        .into_iter()
        .find(|entry| entry.id == id)
}

#[derive(Serialize)]
struct PathsOutput {
    config: String,
    settings_file: String,
    documents: Option<String>,
    user_settings: String,
    priority_file: String,
    game_exe: Option<String>,
    game: Option<String>,
    mods: Option<String>,
    dlc: Option<String>,
    game_version: &'static str,
    graphics_api: &'static str,
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn list_paths(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let settings = &ctx.settings;
    let output = PathsOutput {
        config: display(settings.configuration()),
        settings_file: display(settings.path()),
        documents: settings.documents().as_deref().map(display),
        user_settings: display(&ctx.user_settings_path()),
        priority_file: display(ctx.priorities.path()),
        game_exe: settings.game_exe().as_deref().map(display),
        game: settings.game().as_deref().map(display),
        mods: settings.mods().as_deref().map(display),
        dlc: settings.dlc().as_deref().map(display),
        game_version: settings.game_version().as_str(),
        graphics_api: settings.graphics_api().as_str(),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            let unset = || "(not set)".to_string();
            println!("Config dir: {}", output.config);
            println!("Settings: {}", output.settings_file);
            println!("Documents: {}", output.documents.unwrap_or_else(unset));
            println!("User settings: {}", output.user_settings);
            println!("Load order: {}", output.priority_file);
            println!("Game exe: {}", output.game_exe.unwrap_or_else(unset));
            println!("Game root: {}", output.game.unwrap_or_else(unset));
            println!("Mods: {}", output.mods.unwrap_or_else(unset));
            println!("DLC: {}", output.dlc.unwrap_or_else(unset));
            println!("Version: {} ({})", output.game_version, output.graphics_api);
        }
    }
    Ok(())
}

/// Load order sorted by numeric priority; entries without one go last.
fn sorted_order(mut entries: Vec<PriorityEntry>) -> Vec<PriorityEntry> {
    entries.sort_by(|a, b| {
        let rank = |entry: &PriorityEntry| {
            entry
                .priority
                .as_deref()
                .and_then(|value| value.trim().parse::<u32>().ok())
                .unwrap_or(u32::MAX)
        };
        rank(a).cmp(&rank(b)).then_with(|| a.id.cmp(&b.id))
    });
    entries
}

fn list_order(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let entries = sorted_order(ctx.priorities.entries());
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No load order entries in {}", ctx.priorities.path().display());
            }
            for entry in entries {
                println!(
                    "{:>5}  {:<3}  {}",
                    entry.priority.as_deref().unwrap_or("-"),
                    if entry.enabled { "on" } else { "off" },
                    entry.id
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct OptionOutput<'a> {
    section: &'a str,
    option: &'a str,
    value: Option<String>,
}

fn get_option(ctx: &AppContext, section: &str, option: &str, format: OutputFormat) -> Result<()> {
    let value = ctx.settings.get(section, option);
    if value.is_none() && format == OutputFormat::Text {
        bail!("{section}/{option} is not set");
    }
    print_value(format, section, option, value)
}

fn print_value(format: OutputFormat, section: &str, option: &str, value: Option<String>) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = OptionOutput {
                section,
                option,
                value,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => println!("{}", value.unwrap_or_default()),
    }
    Ok(())
}

#[derive(Serialize)]
struct RepairOutput {
    path: String,
    renamed: Vec<(String, String)>,
    dropped: Vec<String>,
}

/// Reports what the startup pass fixed, or checks the file again if it fixed nothing.
fn repair(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let report = ctx
        .startup_repair()
        .filter(|report| report.changed())
        .cloned()
        .or_else(|| ctx.repair_user_settings());
    match format {
        OutputFormat::Json => {
            let output = report.map(|report| RepairOutput {
                path: display(&report.path),
                renamed: report.renamed,
                dropped: report.dropped,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match report {
            None => println!("Nothing to repair"),
            Some(report) if !report.changed() => {
                println!("{} is fine", report.path.display())
            }
            Some(report) => {
                for (from, to) in &report.renamed {
                    println!("Renamed [{from}] to [{to}]");
                }
                for name in &report.dropped {
                    println!("Dropped duplicate [{name}]");
                }
            }
        },
    }
    Ok(())
}

fn print_help() {
    println!("w3mm v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  w3mm paths                        Show resolved locations");
    println!("  w3mm order                        List the load order");
    println!("  w3mm get <section> <option>       Print a setting");
    println!("  w3mm set <section> <option> <v>   Change a setting");
    println!("  w3mm priority <mod> <n>           Set a mod's load priority");
    println!("  w3mm remove <mod>                 Remove a mod from the load order");
    println!("  w3mm repair                       Fix doubled brackets in user.settings");
    println!();
    println!("Global options:");
    println!("  -u, --userdocuments <path>        Override the documents path");
    println!("  -g, --game <path>                 Override the game path");
    println!("  -c, --config <path>               Override the config path");
    println!("  --format <json|text>              Output format");
    println!("  -h, --help                        Show help");
    println!("  -V, --version                     Show version");
    println!();
    println!("Set RUST_LOG (e.g. RUST_LOG=debug) to change log output.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn global_options_anywhere_on_the_line() {
        let (global, command) = parse_args(&args(&[
            "get",
            "--format=json",
            "SETTINGS",
            "-c",
            "/tmp/cfg",
            "language",
            "--userdocuments",
            "/home/geralt/Documents",
        ]))
        .unwrap();
        assert_eq!(global.format, OutputFormat::Json);
        assert_eq!(global.overrides.config, Some(PathBuf::from("/tmp/cfg")));
        assert_eq!(
            global.overrides.documents,
            Some(PathBuf::from("/home/geralt/Documents"))
        );
        assert_eq!(global.overrides.game, None);
        assert_eq!(
            command,
            CliCommand::Get {
                section: "SETTINGS".to_string(),
                option: "language".to_string(),
            }
        );
    }

    #[test]
    fn no_arguments_shows_help() {
        let (global, command) = parse_args(&[]).unwrap();
        assert_eq!(command, CliCommand::Help);
        assert_eq!(global.format, OutputFormat::Text);
        assert_eq!(parse_args(&args(&["-V"])).unwrap().1, CliCommand::Version);
    }

    #[test]
    fn missing_values_are_errors() {
        assert!(parse_args(&args(&["paths", "--game"])).is_err());
        assert!(parse_args(&args(&["set", "PATHS", "lastpath"])).is_err());
        assert!(parse_args(&args(&["--format", "yaml", "paths"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }

    #[test]
    fn priority_must_be_numeric() {
        assert_eq!(
            parse_args(&args(&["priority", "mod_Foo", "3"])).unwrap().1,
            CliCommand::Priority {
                id: "mod_Foo".to_string(),
                value: "3".to_string(),
            }
        );
        assert!(parse_args(&args(&["priority", "mod_Foo", "first"])).is_err());
    }

    #[test]
    fn order_sorts_by_numeric_priority() {
        let entry = |id: &str, priority: Option<&str>| PriorityEntry {
            id: id.to_string(),
            enabled: true,
            priority: priority.map(str::to_string),
        };
        let sorted = sorted_order(vec![
            entry("mod_C", None),
            entry("mod_B", Some("10")),
            entry("mod_A", Some("9")),
            entry("mod_D", Some("9")),
        ]);
        let ids: Vec<&str> = sorted.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["mod_A", "mod_D", "mod_B", "mod_C"]);
    }
}
